//! HTTP/2 frame types and flags
//!
//! Definitions follow RFC 9113 Section 6. Frames are handled generically —
//! one `Frame` struct carries any type — because most of the pipeline only
//! routes on the type byte and a handful of flag bits.

use bytes::Bytes;
use std::fmt;

/// Stream identifier (31 bits on the wire).
pub type StreamId = u32;

/// The connection itself is addressed as stream 0.
pub const CONNECTION_STREAM_ID: StreamId = 0;

/// HTTP/2 frame types.
///
/// Types above CONTINUATION are carried as `Unknown` so they can be read
/// and then discarded, as the protocol requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// DATA frame (0x0)
    Data,
    /// HEADERS frame (0x1)
    Headers,
    /// PRIORITY frame (0x2)
    Priority,
    /// RST_STREAM frame (0x3)
    RstStream,
    /// SETTINGS frame (0x4)
    Settings,
    /// PUSH_PROMISE frame (0x5)
    PushPromise,
    /// PING frame (0x6)
    Ping,
    /// GOAWAY frame (0x7)
    Goaway,
    /// WINDOW_UPDATE frame (0x8)
    WindowUpdate,
    /// CONTINUATION frame (0x9)
    Continuation,
    /// Any type this implementation does not know
    Unknown(u8),
}

impl FrameType {
    /// Map a wire type byte to a frame type. Never fails; unrecognized
    /// bytes map to `Unknown`.
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::Goaway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    /// Wire type byte.
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::Goaway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(other) => other,
        }
    }

    /// Frame type name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
            FrameType::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) — same bit as END_STREAM, used by SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Create empty flags.
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from the wire byte.
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Raw flag byte.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Set a flag bit.
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Clear a flag bit.
    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Whether a flag bit is set.
    pub fn is_set(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Whether END_STREAM is set.
    pub fn is_end_stream(self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Whether ACK is set.
    pub fn is_ack(self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Whether END_HEADERS is set.
    pub fn is_end_headers(self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Whether PADDED is set.
    pub fn is_padded(self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Whether PRIORITY is set.
    pub fn is_priority(self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// A generic HTTP/2 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type
    pub typ: FrameType,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID (0 addresses the connection)
    pub stream_id: StreamId,
    /// Frame payload, already normalized (no padding, no priority prefix)
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(typ: FrameType, flags: FrameFlags, stream_id: StreamId, payload: Bytes) -> Self {
        Frame {
            typ,
            flags,
            stream_id,
            payload,
        }
    }

    /// Create a frame with empty flags and payload.
    pub fn control(typ: FrameType, stream_id: StreamId) -> Self {
        Frame::new(typ, FrameFlags::empty(), stream_id, Bytes::new())
    }

    /// Payload length.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Whether sending this frame terminates its stream: it carries
    /// END_STREAM, or it is a RST_STREAM.
    pub fn is_stream_terminator(&self) -> bool {
        self.typ == FrameType::RstStream
            || (matches!(self.typ, FrameType::Data | FrameType::Headers)
                && self.flags.is_end_stream())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stream={} flags=0x{:x} len={}",
            self.typ.name(),
            self.stream_id,
            self.flags.as_u8(),
            self.payload.len()
        )
    }
}

/// SETTINGS parameters this implementation recognizes
/// (RFC 9113 Section 6.5.2). Unknown identifiers are decoded and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    HeaderTableSize = 0x1,
    /// SETTINGS_ENABLE_PUSH (0x2)
    EnablePush = 0x2,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    MaxConcurrentStreams = 0x3,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    InitialWindowSize = 0x4,
    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    MaxFrameSize = 0x5,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    /// Wire identifier.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Map a wire identifier to a known parameter.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            _ => None,
        }
    }

    /// Parameter name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }
}
