//! h2lite — a minimal HTTP/2 server
//!
//! This crate implements the core of an HTTP/2 server: reading framed bytes
//! off a secured transport, decoding HPACK-compressed header blocks against
//! a shared dynamic table, driving per-stream state machines, dispatching
//! assembled requests to a user handler, and emitting flow-controlled
//! responses. Each connection runs as a small pipeline of tasks — reader,
//! multiplexer, writer — communicating only by message passing.
//!
//! # Example
//!
//! ```no_run
//! use h2lite::{Request, ResponseSink, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(
//!         "cert.pem",
//!         "key.pem",
//!         |_req: Request, res: &mut ResponseSink| {
//!             res.set_status(200);
//!             res.write(b"hello");
//!         },
//!     )?;
//!
//!     server.listen_and_serve("127.0.0.1:8443").await?;
//!     Ok(())
//! }
//! ```
//!
//! Embedders that terminate TLS themselves (or run over another trusted
//! transport) can skip the listener and call [`h2::serve_connection`]
//! directly with any split duplex byte stream.

pub mod h2;
pub mod hpack;
pub mod server;

pub use h2::{
    serve_connection, ConnectionError, ErrorCode, Frame, FrameFlags, FrameType, H2Error, Handler,
    Request, ResponseSink, StreamId,
};
pub use hpack::{HeaderField, HeaderList};
pub use server::{Server, ServerError};
