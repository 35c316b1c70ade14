//! HTTP/2 error types
//!
//! Protocol faults carry a wire error code plus a human-readable message;
//! the message travels as GOAWAY debug data. A separate connection-level
//! error distinguishes protocol faults (answered with GOAWAY) from
//! transport failures (the connection is simply gone).

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use super::frame::{Frame, FrameFlags, FrameType, StreamId};

/// Error codes carried by RST_STREAM and GOAWAY frames.
///
/// Only the codes this server emits or acts on are modeled; in particular
/// COMPRESSION_ERROR travels as 0x07 on this wire. Anything else read off
/// the wire is reported numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Generic protocol violation
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Frame received on a closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Header compression state not updated
    CompressionError = 0x7,
}

impl ErrorCode {
    /// Wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Map a wire value to a known code.
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::CompressionError),
            _ => None,
        }
    }

    /// Error code name.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// A protocol fault: an error code plus a message destined for GOAWAY
/// debug data or the log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct H2Error {
    /// Wire error code
    pub code: ErrorCode,
    /// Human-readable description
    pub message: String,
}

impl H2Error {
    /// Create a protocol fault.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        H2Error {
            code,
            message: message.into(),
        }
    }

    /// Build the GOAWAY frame announcing this fault.
    ///
    /// The last-stream-id field (bytes 0..4) is left zero here; the writer
    /// patches it with the actual last-processed stream id just before the
    /// frame hits the wire.
    pub fn to_goaway_frame(&self) -> Frame {
        let mut payload = BytesMut::with_capacity(8 + self.message.len());
        payload.put_u32(0);
        payload.put_u32(self.code.as_u32());
        payload.put_slice(self.message.as_bytes());

        Frame::new(
            FrameType::Goaway,
            FrameFlags::empty(),
            0,
            payload.freeze(),
        )
    }

    /// Build the RST_STREAM frame answering this fault on one stream.
    pub fn to_rst_stream_frame(&self, stream_id: StreamId) -> Frame {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32(self.code.as_u32());

        Frame::new(
            FrameType::RstStream,
            FrameFlags::empty(),
            stream_id,
            payload.freeze(),
        )
    }
}

/// Convenience constructors for the codes the pipeline raises.
impl H2Error {
    /// PROTOCOL_ERROR fault.
    pub fn protocol(message: impl Into<String>) -> Self {
        H2Error::new(ErrorCode::ProtocolError, message)
    }

    /// FRAME_SIZE_ERROR fault.
    pub fn frame_size(message: impl Into<String>) -> Self {
        H2Error::new(ErrorCode::FrameSizeError, message)
    }

    /// COMPRESSION_ERROR fault.
    pub fn compression(message: impl Into<String>) -> Self {
        H2Error::new(ErrorCode::CompressionError, message)
    }

    /// STREAM_CLOSED fault.
    pub fn stream_closed(message: impl Into<String>) -> Self {
        H2Error::new(ErrorCode::StreamClosed, message)
    }

    /// FLOW_CONTROL_ERROR fault.
    pub fn flow_control(message: impl Into<String>) -> Self {
        H2Error::new(ErrorCode::FlowControlError, message)
    }
}

/// Errors surfaced while reading from the connection.
///
/// Protocol faults are answered with a GOAWAY before teardown; transport
/// errors terminate silently because the pipe is already gone.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer violated the protocol
    #[error("protocol error: {0}")]
    H2(#[from] H2Error),

    /// The transport failed
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for connection-level operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Parse the payload of a received GOAWAY frame for logging:
/// (last-stream-id, error code, debug data).
pub fn parse_goaway(payload: &Bytes) -> (u32, u32, String) {
    if payload.len() < 8 {
        return (0, 0, String::new());
    }

    let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
    let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let debug = String::from_utf8_lossy(&payload[8..]).into_owned();
    (last, code, debug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::ProtocolError.as_u32(), 0x1);
        assert_eq!(ErrorCode::CompressionError.as_u32(), 0x7);
        assert_eq!(ErrorCode::from_u32(0x6), Some(ErrorCode::FrameSizeError));
        assert_eq!(ErrorCode::from_u32(0x7), Some(ErrorCode::CompressionError));
        assert_eq!(ErrorCode::from_u32(0xff), None);
    }

    #[test]
    fn test_goaway_frame_layout() {
        let err = H2Error::protocol("don't use push promise");
        let frame = err.to_goaway_frame();

        assert_eq!(frame.typ, FrameType::Goaway);
        assert_eq!(frame.stream_id, 0);
        // Last-stream-id placeholder, then the code, then debug text.
        assert_eq!(&frame.payload[0..4], &[0, 0, 0, 0]);
        assert_eq!(&frame.payload[4..8], &0x1u32.to_be_bytes());
        assert_eq!(&frame.payload[8..], b"don't use push promise");
    }

    #[test]
    fn test_rst_stream_frame_layout() {
        let err = H2Error::stream_closed("closed stream received frame");
        let frame = err.to_rst_stream_frame(7);

        assert_eq!(frame.typ, FrameType::RstStream);
        assert_eq!(frame.stream_id, 7);
        assert_eq!(&frame.payload[..], &0x5u32.to_be_bytes());
    }

    #[test]
    fn test_parse_goaway() {
        let err = H2Error::frame_size("too large payload");
        let frame = err.to_goaway_frame();

        let (last, code, debug) = parse_goaway(&frame.payload);
        assert_eq!(last, 0);
        assert_eq!(code, 0x6);
        assert_eq!(debug, "too large payload");
    }
}
