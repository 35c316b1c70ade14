//! HTTP/2 stream lifecycle
//!
//! Streams move through the subset of the RFC 9113 Section 5.1 state
//! machine a push-less server needs: idle → open → half-closed (remote) →
//! closed. Idle and closed streams are never materialized; the collection
//! reports them synthetically from its lookup so callers cannot mutate a
//! stream that does not exist.

use bytes::Bytes;
use std::collections::HashMap;

use super::error::H2Error;
use super::frame::{Frame, FrameType, StreamId};
use crate::hpack::HeaderList;

/// Stream states tracked by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frames exchanged yet
    Idle,
    /// HEADERS received without END_STREAM; request still arriving
    Open,
    /// Peer finished sending; the response may still go out
    HalfClosedRemote,
    /// Stream fully terminated
    Closed,
}

/// A stream the server is actively tracking, together with the request
/// data accumulated so far.
#[derive(Debug)]
pub struct Stream {
    /// Current lifecycle state (`Open` or `HalfClosedRemote`; the other
    /// states exist only synthetically in lookups)
    pub state: StreamState,
    /// Request headers decoded so far
    pub headers: HeaderList,
    /// Request body chunks in arrival order
    pub body: Vec<Bytes>,
}

impl Stream {
    /// Create a stream with no data yet.
    pub fn new() -> Self {
        Stream {
            state: StreamState::Open,
            headers: HeaderList::new(),
            body: Vec::new(),
        }
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of looking up a stream id.
///
/// Ids above every id seen so far are synthetically idle; ids at or below
/// the high-water mark that are no longer stored are synthetically closed.
/// Only `Live` grants access to mutable stream state.
#[derive(Debug)]
pub enum Lookup<'a> {
    /// The id has never been used
    Idle,
    /// The stream is stored and in flight
    Live(&'a mut Stream),
    /// The stream existed and is gone
    Closed,
}

impl Lookup<'_> {
    /// The state this lookup result presents to the accept policy.
    pub fn state(&self) -> StreamState {
        match self {
            Lookup::Idle => StreamState::Idle,
            Lookup::Live(stream) => stream.state,
            Lookup::Closed => StreamState::Closed,
        }
    }
}

/// All streams of one connection plus the highest id ever stored.
///
/// Closed streams are deleted outright; the high-water mark is what lets
/// the lookup distinguish "never existed" from "already over".
#[derive(Debug, Default)]
pub struct StreamCollection {
    entries: HashMap<StreamId, Stream>,
    max_id: StreamId,
}

impl StreamCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        StreamCollection {
            entries: HashMap::new(),
            max_id: 0,
        }
    }

    /// Look up a stream id, yielding a live stream or a synthetic state.
    pub fn lookup(&mut self, id: StreamId) -> Lookup<'_> {
        if id > self.max_id {
            return Lookup::Idle;
        }

        match self.entries.get_mut(&id) {
            Some(stream) => Lookup::Live(stream),
            None => Lookup::Closed,
        }
    }

    /// Store a stream, advancing the high-water mark.
    pub fn save(&mut self, id: StreamId, stream: Stream) {
        self.entries.insert(id, stream);
        if self.max_id < id {
            self.max_id = id;
        }
    }

    /// Remove a stream; its id keeps reading as closed afterwards.
    pub fn close(&mut self, id: StreamId) {
        self.entries.remove(&id);
        if self.max_id < id {
            self.max_id = id;
        }
    }

    /// Number of streams currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no streams are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decide whether a stream in `state` may receive `frame`
/// (the accept table of RFC 9113 Section 5.1, reduced to the states a
/// push-less server can be in).
///
/// A violation on an idle stream is a connection-level PROTOCOL_ERROR; on
/// a half-closed or closed stream it is a stream-level STREAM_CLOSED.
pub fn accept_policy(state: StreamState, frame: &Frame) -> Result<(), H2Error> {
    match state {
        StreamState::Idle => {
            if frame.typ != FrameType::Headers {
                return Err(H2Error::protocol(format!(
                    "idle stream received {}",
                    frame.typ.name()
                )));
            }
        }
        StreamState::Open => {}
        StreamState::HalfClosedRemote => {
            if !matches!(frame.typ, FrameType::WindowUpdate | FrameType::RstStream) {
                return Err(H2Error::stream_closed(format!(
                    "half closed (remote) stream received {}",
                    frame.typ.name()
                )));
            }
        }
        StreamState::Closed => {
            if !matches!(frame.typ, FrameType::WindowUpdate | FrameType::RstStream) {
                return Err(H2Error::stream_closed(format!(
                    "closed stream received {}",
                    frame.typ.name()
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::error::ErrorCode;
    use crate::h2::frame::FrameFlags;

    fn frame(typ: FrameType) -> Frame {
        Frame::new(typ, FrameFlags::empty(), 1, Bytes::new())
    }

    #[test]
    fn test_lookup_unknown_high_id_is_idle() {
        let mut streams = StreamCollection::new();
        assert!(matches!(streams.lookup(1), Lookup::Idle));
        assert!(matches!(streams.lookup(99), Lookup::Idle));
    }

    #[test]
    fn test_lookup_live_stream() {
        let mut streams = StreamCollection::new();
        streams.save(5, Stream::new());

        match streams.lookup(5) {
            Lookup::Live(stream) => assert_eq!(stream.state, StreamState::Open),
            other => panic!("expected live stream, got {:?}", other),
        }
    }

    #[test]
    fn test_lookup_below_high_water_mark_is_closed() {
        let mut streams = StreamCollection::new();
        streams.save(5, Stream::new());

        // Stream 3 was never stored but sits below the mark.
        assert!(matches!(streams.lookup(3), Lookup::Closed));

        streams.close(5);
        assert!(matches!(streams.lookup(5), Lookup::Closed));
        // Ids above the mark stay idle.
        assert!(matches!(streams.lookup(7), Lookup::Idle));
    }

    #[test]
    fn test_close_without_save_still_marks_id() {
        let mut streams = StreamCollection::new();
        // A stream rejected before ever being stored must still read as
        // closed afterwards.
        streams.close(9);
        assert!(matches!(streams.lookup(9), Lookup::Closed));
    }

    #[test]
    fn test_closed_streams_are_deleted() {
        let mut streams = StreamCollection::new();
        streams.save(1, Stream::new());
        streams.save(3, Stream::new());
        assert_eq!(streams.len(), 2);

        streams.close(1);
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn test_accept_policy_idle() {
        assert!(accept_policy(StreamState::Idle, &frame(FrameType::Headers)).is_ok());

        let err = accept_policy(StreamState::Idle, &frame(FrameType::Data)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolError);

        let err = accept_policy(StreamState::Idle, &frame(FrameType::WindowUpdate)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolError);
    }

    #[test]
    fn test_accept_policy_open_accepts_anything() {
        for typ in [
            FrameType::Data,
            FrameType::Headers,
            FrameType::RstStream,
            FrameType::WindowUpdate,
        ] {
            assert!(accept_policy(StreamState::Open, &frame(typ)).is_ok());
        }
    }

    #[test]
    fn test_accept_policy_half_closed_and_closed() {
        for state in [StreamState::HalfClosedRemote, StreamState::Closed] {
            assert!(accept_policy(state, &frame(FrameType::WindowUpdate)).is_ok());
            assert!(accept_policy(state, &frame(FrameType::RstStream)).is_ok());

            let err = accept_policy(state, &frame(FrameType::Data)).unwrap_err();
            assert_eq!(err.code, ErrorCode::StreamClosed);

            let err = accept_policy(state, &frame(FrameType::Headers)).unwrap_err();
            assert_eq!(err.code, ErrorCode::StreamClosed);
        }
    }
}
