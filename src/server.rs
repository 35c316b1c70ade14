//! TLS listener and connection acceptance
//!
//! The HTTP/2 core only requires a duplex byte stream whose peer has
//! negotiated `h2` through ALPN; this module provides that stream. It loads
//! a PEM certificate chain and private key, builds a rustls acceptor that
//! advertises `h2`, and hands every accepted connection whose handshake
//! actually settled on `h2` to the per-connection pipeline. Anything else
//! is dropped before the core ever runs.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, PrivateKey, ServerConfig};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn, Instrument};

use crate::h2::request::Handler;
use crate::h2::serve_connection;

/// The ALPN protocol identifier for HTTP/2 over TLS.
pub const ALPN_H2: &[u8] = b"h2";

/// Errors raised while configuring or running the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration was rejected
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The certificate file held no certificates
    #[error("no certificate found in {0}")]
    NoCertificate(String),

    /// The key file held no usable private key
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// An HTTP/2-over-TLS server: a TLS acceptor plus the request handler
/// shared by every connection.
pub struct Server {
    acceptor: TlsAcceptor,
    handler: Arc<dyn Handler>,
}

impl Server {
    /// Build a server from PEM-encoded certificate chain and private key
    /// files.
    pub fn new(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        handler: impl Handler,
    ) -> Result<Self> {
        let certs = load_certs(cert_path.as_ref())?;
        let key = load_private_key(key_path.as_ref())?;

        let mut config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        Ok(Server {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            handler: Arc::new(handler),
        })
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn listen_and_serve(&self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "server listening");

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let acceptor = self.acceptor.clone();
            let handler = Arc::clone(&self.handler);

            let span = tracing::info_span!("connection", peer = %peer_addr);
            tokio::spawn(
                async move {
                    handle_connection(acceptor, stream, peer_addr, handler).await;
                }
                .instrument(span),
            );
        }
    }
}

/// Handshake one accepted TCP connection, enforce the ALPN result, and run
/// the HTTP/2 pipeline over it.
async fn handle_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<dyn Handler>,
) {
    info!("accepted connection");

    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(error) => {
            warn!(%error, "TLS handshake failed");
            return;
        }
    };

    let negotiated = {
        let (_, session) = tls_stream.get_ref();
        session.alpn_protocol().map(<[u8]>::to_vec)
    };
    if negotiated.as_deref() != Some(ALPN_H2) {
        warn!(?negotiated, "peer did not negotiate h2");
        return;
    }

    let (read_half, write_half) = tokio::io::split(tls_stream);
    serve_connection(read_half, write_half, handler).await;

    debug!(peer = %peer_addr, "connection finished");
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect();

    if certs.is_empty() {
        return Err(ServerError::NoCertificate(path.display().to_string()));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let mut reader = BufReader::new(File::open(path)?);

    while let Some(item) = rustls_pemfile::read_one(&mut reader)? {
        match item {
            rustls_pemfile::Item::PKCS8Key(key)
            | rustls_pemfile::Item::RSAKey(key)
            | rustls_pemfile::Item::ECKey(key) => return Ok(PrivateKey(key)),
            _ => continue,
        }
    }

    Err(ServerError::NoPrivateKey(path.display().to_string()))
}
