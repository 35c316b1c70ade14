//! The reader component
//!
//! Owns the transport's read half for the life of the connection: verifies
//! the client preface, reads frames, answers PING inline, reassembles
//! fragmented header blocks, and forwards everything stream-relevant to the
//! multiplexer in receive order. Whatever ends the loop, the multiplexer is
//! told the reader is gone so shutdown can propagate.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use super::codec::read_frame;
use super::error::{self, ConnectionError, H2Error};
use super::frame::{Frame, FrameFlags, FrameType};
use super::mux::MuxHandle;
use super::writer::WriterHandle;
use super::{CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE};

/// Run the reader loop until the connection is done.
///
/// Consumes its handles on exit so the shutdown chain (reader →
/// multiplexer → writer) observes the right sender drops.
pub async fn run<R>(mut peer: R, writer: WriterHandle, mux: MuxHandle)
where
    R: AsyncRead + Unpin,
{
    if let Err(error) = read_preface(&mut peer).await {
        // No framed layer is established yet, so no GOAWAY either.
        debug!(%error, "failed to read client preface");
        mux.reader_closed();
        return;
    }
    info!("connection preface completed");

    read_loop(&mut peer, &writer, &mux).await;

    debug!("reader shutdown");
    mux.reader_closed();
}

/// Read and verify the 24-byte client connection preface.
async fn read_preface<R>(peer: &mut R) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut received = [0u8; 24];
    peer.read_exact(&mut received).await?;

    if received != *CONNECTION_PREFACE {
        return Err(H2Error::protocol("invalid client preface").into());
    }

    Ok(())
}

async fn read_loop<R>(peer: &mut R, writer: &WriterHandle, mux: &MuxHandle)
where
    R: AsyncRead + Unpin,
{
    // Fragments of an unfinished header block: the opening HEADERS frame
    // and its CONTINUATIONs so far.
    let mut header_fragments: Vec<Frame> = Vec::new();

    loop {
        let mut frame = match read_frame(peer, DEFAULT_MAX_FRAME_SIZE).await {
            Ok(frame) => frame,
            Err(ConnectionError::H2(error)) => {
                writer.write_goaway(&error);
                return;
            }
            Err(ConnectionError::Io(error)) => {
                debug!(%error, "failed to read frame");
                return;
            }
        };

        // While a header block is open, its CONTINUATIONs are the only
        // legal traffic on the connection.
        if let Some(opening) = header_fragments.first() {
            if frame.typ != FrameType::Continuation || frame.stream_id != opening.stream_id {
                writer.write_goaway(&H2Error::protocol("invalid header sequence"));
                return;
            }
        }

        match frame.typ {
            FrameType::Unknown(typ) => {
                debug!(typ, "discarding unknown frame type");
                continue;
            }

            FrameType::Headers => {
                if !frame.flags.is_end_headers() {
                    header_fragments.push(frame);
                    continue;
                }
            }

            FrameType::Priority => continue,

            FrameType::Settings => {
                if frame.flags.is_ack() {
                    continue;
                }
            }

            FrameType::PushPromise => {
                writer.write_goaway(&H2Error::protocol("don't use push promise"));
                return;
            }

            FrameType::Ping => {
                if frame.payload.len() != 8 {
                    writer.write_goaway(&H2Error::frame_size(format!(
                        "PING payload of {} bytes",
                        frame.payload.len()
                    )));
                    return;
                }
                if !frame.flags.is_ack() {
                    debug!("received PING, responding with ack");
                    frame.flags = FrameFlags::from_u8(FrameFlags::ACK);
                    writer.write(frame);
                }
                continue;
            }

            FrameType::Goaway => {
                let (last, code, debug_data) = error::parse_goaway(&frame.payload);
                info!(last_stream = last, code, debug_data = %debug_data, "received GOAWAY");
                return;
            }

            FrameType::Continuation => {
                if header_fragments.is_empty() {
                    writer.write_goaway(&H2Error::protocol("invalid header block"));
                    return;
                }

                let end_headers = frame.flags.is_end_headers();
                header_fragments.push(frame);
                if !end_headers {
                    continue;
                }

                frame = merge_header_fragments(std::mem::take(&mut header_fragments));
            }

            FrameType::Data | FrameType::RstStream | FrameType::WindowUpdate => {}
        }

        // DATA, complete HEADERS, RST_STREAM, SETTINGS and WINDOW_UPDATE
        // reach the multiplexer; if it is gone, so is the connection.
        if !mux.forward(frame) {
            return;
        }
    }
}

/// Collapse a buffered HEADERS frame and its CONTINUATIONs into a single
/// synthesized HEADERS frame: the concatenated payloads, END_HEADERS, and
/// the opening frame's END_STREAM.
fn merge_header_fragments(fragments: Vec<Frame>) -> Frame {
    let opening = &fragments[0];

    let mut flags = FrameFlags::from_u8(opening.flags.as_u8() & FrameFlags::END_STREAM);
    flags.set(FrameFlags::END_HEADERS);

    let mut payload = BytesMut::with_capacity(fragments.iter().map(Frame::payload_len).sum());
    for fragment in &fragments {
        payload.extend_from_slice(&fragment.payload);
    }

    Frame::new(
        FrameType::Headers,
        flags,
        opening.stream_id,
        payload.freeze(),
    )
}
