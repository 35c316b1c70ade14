//! HTTP/2 server core
//!
//! The per-connection pipeline: frame codec, reader, multiplexer and writer
//! tasks, stream lifecycle, request assembly and response translation.
//! `serve_connection` wires it all together over any duplex byte stream;
//! the `server` module puts a TLS listener in front of it.

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod mux;
pub mod reader;
pub mod request;
pub mod response;
pub mod stream;
pub mod writer;

pub use connection::serve_connection;
pub use error::{ConnectionError, ErrorCode, H2Error};
pub use frame::{Frame, FrameFlags, FrameType, SettingsParameter, StreamId};
pub use request::{Handler, Request};
pub use response::ResponseSink;

/// The fixed 24-byte connection preface every client opens with
/// (RFC 9113 Section 3.4).
pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default maximum frame payload size (RFC 9113 Section 4.2).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16384;

/// Default initial flow-control window size (RFC 9113 Section 6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default HPACK dynamic table cap (RFC 9113 Section 6.5.2).
pub const DEFAULT_HEADER_TABLE_SIZE: usize = 4096;

/// The receive window this server advertises: the largest legal value, so
/// inbound DATA is never throttled.
pub const MAX_ADVERTISED_WINDOW_SIZE: u32 = 2_147_483_647;
