//! The multiplexer component
//!
//! One task per connection owns the HPACK decoder table and the stream
//! collection. It admits frames against the per-stream accept policy,
//! assembles requests, spawns one handler task per completed request, and
//! turns finished responses into frames for the writer. Its input channel
//! carries frames from the reader, completions from handler tasks, and the
//! reader's shutdown signal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::decode_settings;
use super::error::{self, ErrorCode, H2Error};
use super::frame::{Frame, FrameType, SettingsParameter, StreamId, CONNECTION_STREAM_ID};
use super::request::{build_request, Handler};
use super::response::ResponseSink;
use super::stream::{accept_policy, Lookup, Stream, StreamCollection, StreamState};
use super::writer::WriterHandle;
use super::DEFAULT_HEADER_TABLE_SIZE;
use crate::hpack::{self, IndexTable};

/// Messages accepted by the multiplexer task.
#[derive(Debug)]
pub enum MuxMessage {
    /// A frame forwarded by the reader
    Frame(Frame),
    /// A handler task finished and published its response
    Response(ResponseSink),
    /// The reader's loop has exited; drain and shut down
    ReaderClosed,
}

/// Cloneable handle used by the reader and by handler tasks.
#[derive(Debug, Clone)]
pub struct MuxHandle {
    tx: mpsc::UnboundedSender<MuxMessage>,
}

impl MuxHandle {
    /// Forward a frame. Returns false once the multiplexer is gone, which
    /// tells the reader to stop.
    pub fn forward(&self, frame: Frame) -> bool {
        self.tx.send(MuxMessage::Frame(frame)).is_ok()
    }

    /// Signal that the reader has exited.
    pub fn reader_closed(&self) {
        let _ = self.tx.send(MuxMessage::ReaderClosed);
    }
}

/// Spawn the multiplexer task for a connection.
pub fn spawn(
    writer: WriterHandle,
    handler: Arc<dyn Handler>,
) -> (MuxHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let mux = Multiplexer {
        writer,
        rx,
        completion_tx: tx.clone(),
        index_table: IndexTable::new(DEFAULT_HEADER_TABLE_SIZE),
        streams: StreamCollection::new(),
        handler,
        running_handlers: 0,
    };

    let handle = tokio::spawn(mux.run());
    (MuxHandle { tx }, handle)
}

struct Multiplexer {
    writer: WriterHandle,
    rx: mpsc::UnboundedReceiver<MuxMessage>,
    /// Sender handed to handler tasks for publishing completions.
    completion_tx: mpsc::UnboundedSender<MuxMessage>,
    index_table: IndexTable,
    streams: StreamCollection,
    handler: Arc<dyn Handler>,
    running_handlers: usize,
}

/// Outcome of processing one message.
enum Flow {
    Continue,
    /// Stop processing frames; a GOAWAY is already on its way out.
    Terminate,
}

impl Multiplexer {
    async fn run(mut self) {
        loop {
            let message = match self.rx.recv().await {
                Some(message) => message,
                // All senders gone; nothing further can arrive.
                None => break,
            };

            match message {
                MuxMessage::Frame(frame) => {
                    if let Flow::Terminate = self.process_frame(frame) {
                        break;
                    }
                }
                MuxMessage::Response(sink) => self.write_response(sink),
                MuxMessage::ReaderClosed => break,
            }
        }

        // Every spawned handler still holds a completion sender; collect
        // their responses (writing those still deliverable) so the GOAWAY
        // last-processed id reflects everything actually answered. Only
        // then may the writer be released.
        while self.running_handlers > 0 {
            match self.rx.recv().await {
                Some(MuxMessage::Response(sink)) => self.write_response(sink),
                Some(_) => {}
                None => break,
            }
        }

        debug!("multiplexer shutdown");
    }

    /// Apply the stream accept policy, then dispatch on frame type.
    fn process_frame(&mut self, frame: Frame) -> Flow {
        if frame.stream_id != CONNECTION_STREAM_ID {
            let state = self.streams.lookup(frame.stream_id).state();
            if let Err(error) = accept_policy(state, &frame) {
                return match error.code {
                    ErrorCode::ProtocolError => {
                        warn!(stream = frame.stream_id, %error, "connection error");
                        self.writer.write_goaway(&error);
                        Flow::Terminate
                    }
                    _ => {
                        debug!(stream = frame.stream_id, %error, "stream error");
                        self.writer.write(error.to_rst_stream_frame(frame.stream_id));
                        self.streams.close(frame.stream_id);
                        Flow::Continue
                    }
                };
            }
        } else if matches!(
            frame.typ,
            FrameType::Data | FrameType::Headers | FrameType::RstStream
        ) {
            // Stream-scoped frames must not address the connection.
            let error = H2Error::protocol(format!("{} on stream 0", frame.typ.name()));
            self.writer.write_goaway(&error);
            return Flow::Terminate;
        }

        match frame.typ {
            FrameType::Data => self.handle_data(frame),
            FrameType::Headers => self.handle_headers(frame),
            FrameType::RstStream => self.handle_rst_stream(frame),
            FrameType::Settings => self.handle_settings(frame),
            FrameType::WindowUpdate => self.handle_window_update(frame),
            // The reader filters everything else out before forwarding.
            _ => Flow::Continue,
        }
    }

    /// DATA: append the payload as a body chunk; END_STREAM completes the
    /// request and starts its handler.
    fn handle_data(&mut self, frame: Frame) -> Flow {
        let end_stream = frame.flags.is_end_stream();

        let stream = match self.streams.lookup(frame.stream_id) {
            Lookup::Live(stream) => stream,
            // The accept policy only lets DATA through on open streams.
            _ => return Flow::Continue,
        };
        stream.body.push(frame.payload);

        if end_stream {
            self.spawn_handler(frame.stream_id);
        }

        Flow::Continue
    }

    /// HEADERS (complete blocks only): decode through the shared index
    /// table and append to the stream's header list. END_STREAM completes
    /// the request; otherwise the stream is (or stays) open.
    fn handle_headers(&mut self, frame: Frame) -> Flow {
        let headers = match hpack::decode_header_block(&mut self.index_table, &frame.payload) {
            Ok(headers) => headers,
            Err(error) => {
                warn!(%error, "failed to decode header block");
                self.writer
                    .write_goaway(&H2Error::compression("failed to decode header block"));
                return Flow::Terminate;
            }
        };

        let end_stream = frame.flags.is_end_stream();
        match self.streams.lookup(frame.stream_id) {
            Lookup::Live(stream) => stream.headers.extend(headers),
            Lookup::Idle => {
                let mut stream = Stream::new();
                stream.headers = headers;
                self.streams.save(frame.stream_id, stream);
            }
            // Closed streams were filtered by the accept policy.
            Lookup::Closed => return Flow::Continue,
        }

        if end_stream {
            self.spawn_handler(frame.stream_id);
        }

        Flow::Continue
    }

    /// RST_STREAM: log the carried code and drop the stream.
    fn handle_rst_stream(&mut self, frame: Frame) -> Flow {
        if frame.payload.len() != 4 {
            self.writer.write_goaway(&H2Error::frame_size(format!(
                "RST_STREAM payload of {} bytes",
                frame.payload.len()
            )));
            return Flow::Terminate;
        }

        let code = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]);
        info!(
            stream = frame.stream_id,
            code,
            name = error::ErrorCode::from_u32(code)
                .map(|c| c.name())
                .unwrap_or("unknown"),
            "received RST_STREAM"
        );

        self.streams.close(frame.stream_id);
        Flow::Continue
    }

    /// SETTINGS (non-ACK): apply HEADER_TABLE_SIZE to the decoder and let
    /// the writer apply the rest and acknowledge.
    fn handle_settings(&mut self, frame: Frame) -> Flow {
        let params = match decode_settings(&frame.payload) {
            Ok(params) => params,
            Err(error) => {
                warn!(%error, "malformed SETTINGS frame");
                self.writer.write_goaway(&error);
                return Flow::Terminate;
            }
        };

        for &(id, value) in &params {
            if SettingsParameter::from_u16(id) == Some(SettingsParameter::HeaderTableSize) {
                self.index_table.update_allowed_size(value as usize);
            }
        }

        self.writer.change_settings(params);
        Flow::Continue
    }

    /// WINDOW_UPDATE: validate and forward the increment to the writer,
    /// keyed by the frame's stream id.
    fn handle_window_update(&mut self, frame: Frame) -> Flow {
        if frame.payload.len() != 4 {
            self.writer.write_goaway(&H2Error::frame_size(format!(
                "WINDOW_UPDATE payload of {} bytes",
                frame.payload.len()
            )));
            return Flow::Terminate;
        }

        let increment = u32::from_be_bytes([
            frame.payload[0],
            frame.payload[1],
            frame.payload[2],
            frame.payload[3],
        ]) & 0x7FFF_FFFF;

        if increment == 0 {
            // A zero increment is meaningless; on a stream it resets that
            // stream, on the connection it is fatal.
            if frame.stream_id == CONNECTION_STREAM_ID {
                self.writer
                    .write_goaway(&H2Error::flow_control("zero connection window increment"));
                return Flow::Terminate;
            }

            let error = H2Error::protocol("zero window increment");
            self.writer.write(error.to_rst_stream_frame(frame.stream_id));
            self.streams.close(frame.stream_id);
            return Flow::Continue;
        }

        self.writer
            .increment_window(frame.stream_id, i64::from(increment));
        Flow::Continue
    }

    /// The request on `stream_id` is complete: build the request record and
    /// run the handler on its own task.
    ///
    /// A request that cannot be built is a stream-level PROTOCOL_ERROR.
    fn spawn_handler(&mut self, stream_id: StreamId) {
        let (headers, body) = match self.streams.lookup(stream_id) {
            Lookup::Live(stream) => (
                std::mem::take(&mut stream.headers),
                std::mem::take(&mut stream.body),
            ),
            _ => return,
        };

        let request = match build_request(headers, &body) {
            Ok(request) => request,
            Err(error) => {
                debug!(stream = stream_id, %error, "failed to build request");
                self.writer
                    .write(H2Error::protocol("request error").to_rst_stream_frame(stream_id));
                self.streams.close(stream_id);
                return;
            }
        };

        if let Lookup::Live(stream) = self.streams.lookup(stream_id) {
            stream.state = StreamState::HalfClosedRemote;
        }
        self.running_handlers += 1;

        info!(stream = stream_id, method = request.method(), path = request.path(),
            "dispatching request");

        let handler = Arc::clone(&self.handler);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let mut sink = ResponseSink::new(stream_id);
            handler.handle(request, &mut sink);
            let _ = completion_tx.send(MuxMessage::Response(sink));
        });
    }

    /// A handler finished. If the stream is still waiting for its response
    /// the sink is translated into frames; a stream reset in the meantime
    /// swallows the response silently. Either way the stream is dropped.
    fn write_response(&mut self, sink: ResponseSink) {
        self.running_handlers -= 1;
        let stream_id = sink.stream_id();

        let deliverable = matches!(
            self.streams.lookup(stream_id).state(),
            StreamState::HalfClosedRemote
        );

        if deliverable {
            for frame in sink.into_frames() {
                self.writer.write(frame);
            }
        } else {
            debug!(stream = stream_id, "dropping response for reset stream");
        }

        self.streams.close(stream_id);
    }
}
