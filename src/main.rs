//! Demo HTTP/2 server binary
//!
//! Serves a hello page over TLS with ALPN-negotiated HTTP/2. Point a
//! browser or `curl --http2 -k` at it:
//!
//! ```text
//! h2lite --listen 127.0.0.1:8443 --cert cert.pem --key key.pem
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use h2lite::{Request, ResponseSink, Server};

#[derive(Debug, StructOpt)]
#[structopt(name = "h2lite", about = "Minimal HTTP/2 server")]
struct Opt {
    /// HOST:PORT address to listen on
    #[structopt(long, default_value = "127.0.0.1:8443")]
    listen: SocketAddr,

    /// Path to the PEM certificate chain
    #[structopt(long)]
    cert: PathBuf,

    /// Path to the PEM private key
    #[structopt(long)]
    key: PathBuf,
}

fn handle(request: Request, response: &mut ResponseSink) {
    tracing::info!(
        method = request.method(),
        path = request.path(),
        body_len = request.body().len(),
        "handling request"
    );

    response.set_status(200);
    response.write(b"<html><body><h1>Hello, HTTP/2!</h1></body></html>");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let opt = Opt::from_args();

    let server = Server::new(&opt.cert, &opt.key, handle)
        .with_context(|| format!("failed to load {:?} / {:?}", opt.cert, opt.key))?;

    server
        .listen_and_serve(opt.listen)
        .await
        .context("server terminated")?;

    Ok(())
}
