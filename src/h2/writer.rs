//! The writer component
//!
//! One task per connection owns the transport's write half, every send
//! window, the queue of flow-control-deferred DATA frames, the current
//! maximum frame size, and the last-processed stream id that GOAWAY
//! reports. Everything reaches it as a message; the input channel closing
//! is the shutdown signal.

use std::collections::{HashMap, VecDeque};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::codec::{self, encode_settings, split_frame};
use super::error::H2Error;
use super::frame::{Frame, FrameFlags, FrameType, SettingsParameter, StreamId, CONNECTION_STREAM_ID};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_ADVERTISED_WINDOW_SIZE};

/// Messages accepted by the writer task.
#[derive(Debug)]
pub enum WriterMessage {
    /// Send a frame (DATA may be deferred by flow control)
    Frame(Frame),
    /// Apply peer SETTINGS and acknowledge them
    Settings(Vec<(u16, u32)>),
    /// Credit a send window
    WindowIncrement { stream_id: StreamId, increment: i64 },
}

/// Cloneable handle other components use to feed the writer.
///
/// Sends are fire-and-forget: once the writer is gone the connection is
/// over and there is nobody left to tell.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl WriterHandle {
    /// Queue a frame for sending.
    pub fn write(&self, frame: Frame) {
        let _ = self.tx.send(WriterMessage::Frame(frame));
    }

    /// Queue a GOAWAY describing `error`.
    pub fn write_goaway(&self, error: &H2Error) {
        self.write(error.to_goaway_frame());
    }

    /// Forward peer SETTINGS for application and acknowledgement.
    pub fn change_settings(&self, params: Vec<(u16, u32)>) {
        let _ = self.tx.send(WriterMessage::Settings(params));
    }

    /// Credit the window of a stream (or of the connection, stream 0).
    pub fn increment_window(&self, stream_id: StreamId, increment: i64) {
        let _ = self
            .tx
            .send(WriterMessage::WindowIncrement { stream_id, increment });
    }
}

/// Spawn the writer task for a connection.
///
/// The task ends when every `WriterHandle` clone has been dropped and the
/// queue has drained, closing the write half on the way out.
pub fn spawn<W>(peer: W) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = Writer {
        peer: Some(peer),
        rx,
        max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        init_window: i64::from(DEFAULT_INITIAL_WINDOW_SIZE),
        windows: HashMap::new(),
        pending_data: VecDeque::new(),
        last_processed: 0,
    };

    let handle = tokio::spawn(writer.run());
    (WriterHandle { tx }, handle)
}

struct Writer<W> {
    /// Write half; taken once on close, so closing is idempotent.
    peer: Option<W>,
    rx: mpsc::UnboundedReceiver<WriterMessage>,
    max_frame_size: usize,
    init_window: i64,
    /// Send windows keyed by stream id; stream 0 is the connection window.
    windows: HashMap<StreamId, i64>,
    /// DATA frames deferred until their windows allow sending, FIFO.
    pending_data: VecDeque<Frame>,
    last_processed: StreamId,
}

impl<W> Writer<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        // Advertise an effectively unbounded receive window up front; the
        // reader never applies backpressure on inbound DATA.
        self.send(Frame::new(
            FrameType::Settings,
            FrameFlags::empty(),
            CONNECTION_STREAM_ID,
            encode_settings(&[(
                SettingsParameter::InitialWindowSize,
                MAX_ADVERTISED_WINDOW_SIZE,
            )]),
        ))
        .await;

        self.windows.insert(CONNECTION_STREAM_ID, self.init_window);

        while let Some(message) = self.rx.recv().await {
            match message {
                WriterMessage::Frame(frame) => self.handle_frame(frame).await,
                WriterMessage::Settings(params) => self.handle_settings(params).await,
                WriterMessage::WindowIncrement { stream_id, increment } => {
                    self.handle_window_increment(stream_id, increment).await
                }
            }
        }

        self.close_peer().await;
        debug!("writer shutdown");
    }

    async fn handle_frame(&mut self, mut frame: Frame) {
        match frame.typ {
            FrameType::Data => {
                if let Some(deferred) = self.send_data_within_windows(frame).await {
                    self.pending_data.push_back(deferred);
                }
                return;
            }
            FrameType::Goaway => {
                // Stamp the id of the last stream actually answered.
                let mut payload = frame.payload.to_vec();
                payload[0..4].copy_from_slice(&self.last_processed.to_be_bytes());
                frame.payload = payload.into();
            }
            _ => {}
        }

        self.send(frame).await;
    }

    /// Send as much of a DATA frame as the stream and connection windows
    /// permit right now.
    ///
    /// A fully covered frame is sent whole. When the windows cover only a
    /// prefix, that prefix goes out as a DATA frame without END_STREAM and
    /// the remainder — carrying the original flags — is returned for
    /// queueing. With no window at all the frame comes back untouched.
    async fn send_data_within_windows(&mut self, frame: Frame) -> Option<Frame> {
        let window = *self
            .windows
            .entry(frame.stream_id)
            .or_insert(self.init_window);
        let connection_window = *self
            .windows
            .entry(CONNECTION_STREAM_ID)
            .or_insert(self.init_window);

        let len = frame.payload.len() as i64;
        let available = window.min(connection_window).max(0);

        if available >= len {
            self.send(frame).await;
            return None;
        }

        trace!(
            stream = frame.stream_id,
            len,
            window,
            connection_window,
            "deferring DATA for flow control"
        );

        if available == 0 {
            return Some(frame);
        }

        let split_at = available as usize;
        let prefix = Frame::new(
            FrameType::Data,
            FrameFlags::empty(),
            frame.stream_id,
            frame.payload.slice(..split_at),
        );
        let remainder = Frame::new(
            FrameType::Data,
            frame.flags,
            frame.stream_id,
            frame.payload.slice(split_at..),
        );

        self.send(prefix).await;
        Some(remainder)
    }

    async fn handle_window_increment(&mut self, stream_id: StreamId, increment: i64) {
        let window = self.windows.entry(stream_id).or_insert(self.init_window);
        *window += increment;
        debug!(stream = stream_id, increment, window = *window, "window credited");

        self.flush_pending_data().await;
    }

    async fn handle_settings(&mut self, params: Vec<(u16, u32)>) {
        // A parameter repeated within one frame behaves like a map insert:
        // the last record wins and is applied once.
        let mut initial_window = None;

        for (id, value) in params {
            match SettingsParameter::from_u16(id) {
                Some(SettingsParameter::InitialWindowSize) => initial_window = Some(value),
                Some(SettingsParameter::MaxFrameSize) => {
                    self.max_frame_size = value as usize;
                    debug!(max_frame_size = value, "applied MAX_FRAME_SIZE");
                }
                Some(param) => trace!(param = param.name(), value, "ignoring setting"),
                None => trace!(id, value, "ignoring unknown setting"),
            }
        }

        if let Some(value) = initial_window {
            // Every tracked window moves by the difference between the new
            // and the old initial size, the connection window included.
            let diff = i64::from(value) - self.init_window;
            for window in self.windows.values_mut() {
                *window += diff;
            }
            self.init_window = i64::from(value);
            debug!(initial_window = value, "applied INITIAL_WINDOW_SIZE");

            self.flush_pending_data().await;
        }

        self.send(Frame::new(
            FrameType::Settings,
            FrameFlags::from_u8(FrameFlags::ACK),
            CONNECTION_STREAM_ID,
            bytes::Bytes::new(),
        ))
        .await;
    }

    /// Re-walk the deferred DATA queue in order, sending whatever the
    /// windows now cover. Frames (or their unsent remainders) stay queued
    /// in their original positions, so per-stream byte order is preserved.
    async fn flush_pending_data(&mut self) {
        let mut remaining = VecDeque::with_capacity(self.pending_data.len());

        while let Some(frame) = self.pending_data.pop_front() {
            if let Some(deferred) = self.send_data_within_windows(frame).await {
                remaining.push_back(deferred);
            }
        }

        self.pending_data = remaining;
    }

    /// Send a frame to the peer, splitting oversized DATA/HEADERS first.
    ///
    /// Window accounting happens per chunk actually written. A GOAWAY
    /// closes the peer after it goes out; once the peer is closed
    /// everything else is dropped on the floor.
    async fn send(&mut self, frame: Frame) {
        if frame.is_stream_terminator() && frame.stream_id > self.last_processed {
            self.last_processed = frame.stream_id;
        }

        if self.peer.is_none() {
            return;
        }

        for chunk in split_frame(frame, self.max_frame_size) {
            let peer = match self.peer.as_mut() {
                Some(peer) => peer,
                None => return,
            };

            if let Err(error) = codec::write_frame(peer, &chunk).await {
                warn!(%error, "failed to write frame");
                self.close_peer().await;
                return;
            }

            match chunk.typ {
                FrameType::Data => {
                    let len = chunk.payload.len() as i64;
                    *self
                        .windows
                        .entry(CONNECTION_STREAM_ID)
                        .or_insert(self.init_window) -= len;
                    *self
                        .windows
                        .entry(chunk.stream_id)
                        .or_insert(self.init_window) -= len;
                }
                FrameType::Goaway => {
                    debug!(
                        last_processed = self.last_processed,
                        "sent GOAWAY, closing connection"
                    );
                    self.close_peer().await;
                    return;
                }
                _ => {}
            }
        }
    }

    /// Close the write half exactly once.
    async fn close_peer(&mut self) {
        if let Some(mut peer) = self.peer.take() {
            let _ = peer.shutdown().await;
            debug!("closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::codec::read_frame;
    use crate::h2::frame::FrameFlags;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    /// Spawn a writer over an in-memory duplex and return the handle plus
    /// the client end to read what it sends.
    fn writer_under_test() -> (WriterHandle, tokio::io::DuplexStream, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(1 << 20);
        let (handle, join) = spawn(server);
        (handle, client, join)
    }

    async fn next_frame(client: &mut tokio::io::DuplexStream) -> Frame {
        read_frame(client, DEFAULT_MAX_FRAME_SIZE).await.unwrap()
    }

    fn data_frame(stream_id: StreamId, payload: &'static [u8], end_stream: bool) -> Frame {
        let flags = if end_stream {
            FrameFlags::from_u8(FrameFlags::END_STREAM)
        } else {
            FrameFlags::empty()
        };
        Frame::new(FrameType::Data, flags, stream_id, Bytes::from_static(payload))
    }

    #[tokio::test]
    async fn test_initial_settings_advertised() {
        let (_handle, mut client, _join) = writer_under_test();

        let frame = next_frame(&mut client).await;
        assert_eq!(frame.typ, FrameType::Settings);
        assert!(!frame.flags.is_ack());

        let params = codec::decode_settings(&frame.payload).unwrap();
        assert_eq!(params, vec![(0x4, 2147483647)]);
    }

    #[tokio::test]
    async fn test_data_sent_within_window() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await; // initial SETTINGS

        handle.write(data_frame(1, b"hello", true));

        let frame = next_frame(&mut client).await;
        assert_eq!(frame.typ, FrameType::Data);
        assert_eq!(&frame.payload[..], b"hello");
        assert!(frame.flags.is_end_stream());
    }

    #[tokio::test]
    async fn test_data_partially_sent_up_to_window() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        // Shrink the windows to 5 bytes.
        handle.change_settings(vec![(0x4, 5)]);
        let ack = next_frame(&mut client).await;
        assert!(ack.flags.is_ack());

        // Only the first five of ten bytes fit the window.
        handle.write(data_frame(1, b"0123456789", true));

        let frame = next_frame(&mut client).await;
        assert_eq!(frame.stream_id, 1);
        assert_eq!(&frame.payload[..], b"01234");
        assert!(!frame.flags.is_end_stream(), "remainder still pending");

        // Crediting the stream alone is not enough; the connection window
        // is exhausted too.
        handle.increment_window(1, 5);
        handle.increment_window(0, 5);

        let frame = next_frame(&mut client).await;
        assert_eq!(frame.stream_id, 1);
        assert_eq!(&frame.payload[..], b"56789");
        assert!(frame.flags.is_end_stream());
    }

    #[tokio::test]
    async fn test_data_deferred_whole_when_no_window() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        handle.change_settings(vec![(0x4, 5)]);
        next_frame(&mut client).await; // ACK

        // First frame exhausts the connection window.
        handle.write(data_frame(1, b"abcde", false));
        let frame = next_frame(&mut client).await;
        assert_eq!(frame.stream_id, 1);

        // Nothing left for stream 3 until the connection is credited.
        handle.write(data_frame(3, b"xyz", true));
        handle.increment_window(0, 100);

        let frame = next_frame(&mut client).await;
        assert_eq!(frame.stream_id, 3);
        assert_eq!(&frame.payload[..], b"xyz");
        assert!(frame.flags.is_end_stream());
    }

    #[tokio::test]
    async fn test_pending_data_released_in_order() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        handle.change_settings(vec![(0x4, 0)]);
        next_frame(&mut client).await; // ACK

        handle.write(data_frame(1, b"first", false));
        handle.write(data_frame(1, b"second", true));

        handle.increment_window(1, 100);
        handle.increment_window(0, 100);

        let first = next_frame(&mut client).await;
        assert_eq!(&first.payload[..], b"first");
        let second = next_frame(&mut client).await;
        assert_eq!(&second.payload[..], b"second");
        assert!(second.flags.is_end_stream());
    }

    #[tokio::test]
    async fn test_goaway_carries_last_processed_id() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        // Completing stream 5 advances the last-processed id.
        handle.write(data_frame(5, b"done", true));
        next_frame(&mut client).await;

        handle.write_goaway(&H2Error::protocol("bye"));

        let goaway = next_frame(&mut client).await;
        assert_eq!(goaway.typ, FrameType::Goaway);
        let (last, code, debug) = crate::h2::error::parse_goaway(&goaway.payload);
        assert_eq!(last, 5);
        assert_eq!(code, 0x1);
        assert_eq!(debug, "bye");

        // The peer is closed after GOAWAY: the client sees EOF.
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_frames_after_goaway_dropped() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        handle.write_goaway(&H2Error::protocol("bye"));
        handle.write(data_frame(1, b"late", true));

        let goaway = next_frame(&mut client).await;
        assert_eq!(goaway.typ, FrameType::Goaway);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "nothing after GOAWAY");
    }

    #[tokio::test]
    async fn test_large_data_split_into_chunks() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        let payload: Vec<u8> = (0..40000u32).map(|i| i as u8).collect();
        let frame = Frame::new(
            FrameType::Data,
            FrameFlags::from_u8(FrameFlags::END_STREAM),
            1,
            Bytes::from(payload.clone()),
        );
        handle.write(frame);

        let mut collected = Vec::new();
        loop {
            let chunk = next_frame(&mut client).await;
            assert_eq!(chunk.typ, FrameType::Data);
            assert!(chunk.payload.len() <= DEFAULT_MAX_FRAME_SIZE);
            collected.extend_from_slice(&chunk.payload);
            if chunk.flags.is_end_stream() {
                break;
            }
        }
        assert_eq!(collected, payload);
    }

    #[tokio::test]
    async fn test_duplicate_initial_window_records_last_wins() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        // Empty the windows, then park a 40-byte frame in the queue.
        handle.change_settings(vec![(0x4, 0)]);
        next_frame(&mut client).await; // ACK
        handle.write(data_frame(
            1,
            b"0123456789012345678901234567890123456789",
            true,
        ));

        // Two INITIAL_WINDOW_SIZE records in one frame: only the final
        // value of 10 may take effect, so exactly ten bytes are released.
        handle.change_settings(vec![(0x4, 100), (0x4, 10)]);

        let frame = next_frame(&mut client).await;
        assert_eq!(frame.typ, FrameType::Data);
        assert_eq!(&frame.payload[..], b"0123456789");
        assert!(!frame.flags.is_end_stream());

        let ack = next_frame(&mut client).await;
        assert!(ack.flags.is_ack());

        // The remainder flows once the windows are credited for real.
        handle.increment_window(0, 100);
        handle.increment_window(1, 100);

        let frame = next_frame(&mut client).await;
        assert_eq!(&frame.payload[..], b"012345678901234567890123456789");
        assert!(frame.flags.is_end_stream());
    }

    #[tokio::test]
    async fn test_settings_ack_always_sent() {
        let (handle, mut client, _join) = writer_under_test();
        next_frame(&mut client).await;

        // Unknown parameters alone still get an ACK.
        handle.change_settings(vec![(0x99, 1)]);
        let ack = next_frame(&mut client).await;
        assert_eq!(ack.typ, FrameType::Settings);
        assert!(ack.flags.is_ack());
        assert!(ack.payload.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_peer() {
        let (handle, mut client, join) = writer_under_test();
        next_frame(&mut client).await;

        drop(handle);
        join.await.unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
