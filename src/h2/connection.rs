//! Per-connection pipeline wiring
//!
//! A served connection is three cooperating tasks plus one ephemeral task
//! per in-flight request:
//!
//! ```text
//! transport ──▶ reader ──▶ multiplexer ──▶ writer ──▶ transport
//!                              │  ▲
//!                        handler tasks
//! ```
//!
//! All channels are unbounded; their depth is naturally bounded because the
//! reader is the multiplexer's only frame producer (at most what one socket
//! delivers) and handler completions are counted. Shutdown propagates in
//! pipeline order: the reader signals the multiplexer when its loop exits,
//! the multiplexer drains its running handlers and then releases the
//! writer, and the writer closes the transport once its queue runs dry.
//! Nothing ever sends to a component that has already stopped listening.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

use super::mux;
use super::reader;
use super::request::Handler;
use super::writer;

/// Serve one established HTTP/2 connection until it terminates.
///
/// `read_half` and `write_half` are the two directions of a duplex byte
/// stream over which the peer already speaks HTTP/2 — for TLS that means
/// ALPN agreed on `h2` before this function runs.
pub async fn serve_connection<R, W>(read_half: R, write_half: W, handler: Arc<dyn Handler>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer_handle, writer_task) = writer::spawn(write_half);
    let (mux_handle, mux_task) = mux::spawn(writer_handle.clone(), handler);

    reader::run(read_half, writer_handle, mux_handle).await;

    // The reader has dropped its handles; the multiplexer drains and drops
    // its own, which lets the writer finish. Join both so the connection
    // is fully torn down before this future resolves.
    if let Err(error) = mux_task.await {
        warn!(%error, "multiplexer task failed");
    }
    if let Err(error) = writer_task.await {
        warn!(%error, "writer task failed");
    }
}
