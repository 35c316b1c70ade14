//! Request construction and the handler contract
//!
//! An assembled request is the stream's decoded header list plus the
//! concatenation of its DATA payloads. The `:method`, `:path` and
//! `:authority` pseudo-headers become fields of the request record; every
//! non-pseudo header passes through unchanged, with `host` synthesized
//! from `:authority` when the client sent none.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::H2Error;
use super::response::ResponseSink;
use crate::hpack::{HeaderField, HeaderList};

/// An HTTP request assembled from one stream.
#[derive(Debug)]
pub struct Request {
    method: String,
    path: String,
    authority: String,
    headers: HeaderList,
    body: Bytes,
}

impl Request {
    /// Request method (`:method`).
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target (`:path`).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request authority (`:authority`).
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// All non-pseudo request headers, `host` guaranteed present.
    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    /// Request body: the received DATA payloads, concatenated.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Build a request record from a stream's header list and body chunks.
///
/// The three request pseudo-headers are required; a request that lacks any
/// of them is a stream-level PROTOCOL_ERROR rather than a panic.
pub fn build_request(headers: HeaderList, body: &[Bytes]) -> Result<Request, H2Error> {
    let pseudo = |name: &str| -> Result<String, H2Error> {
        headers
            .get(name)
            .map(|hf| hf.value().to_owned())
            .ok_or_else(|| H2Error::protocol(format!("request without {} header", name)))
    };

    let method = pseudo(":method")?;
    let path = pseudo(":path")?;
    let authority = pseudo(":authority")?;

    let needs_host = !headers.contains("host");

    let mut plain: HeaderList = headers
        .into_iter()
        .filter(|hf| !hf.name().starts_with(':'))
        .collect();
    if needs_host {
        plain.push(HeaderField::new("host", authority.clone()));
    }

    let mut body_bytes = BytesMut::with_capacity(body.iter().map(Bytes::len).sum());
    for chunk in body {
        body_bytes.put_slice(chunk);
    }

    Ok(Request {
        method,
        path,
        authority,
        headers: plain,
        body: body_bytes.freeze(),
    })
}

/// A request handler.
///
/// Handlers run on their own task, one per in-flight request, and write the
/// response into the sink; everything they write is buffered and only
/// translated into frames once the handler returns.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn handle(&self, request: Request, response: &mut ResponseSink);
}

impl<F> Handler for F
where
    F: Fn(Request, &mut ResponseSink) + Send + Sync + 'static,
{
    fn handle(&self, request: Request, response: &mut ResponseSink) {
        self(request, response)
    }
}
