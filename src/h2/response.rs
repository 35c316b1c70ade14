//! Response buffering and translation into frames
//!
//! Handlers write into a `ResponseSink`; nothing touches the wire until the
//! handler returns and the multiplexer converts the finished sink into a
//! HEADERS frame (plus a DATA frame when there is a body). The writer's
//! splitter takes care of oversized header blocks and bodies downstream.

use bytes::{Bytes, BytesMut};

use super::frame::{Frame, FrameFlags, FrameType, StreamId};
use crate::hpack::{self, HeaderField, HeaderList};

/// An in-memory response sink bound to one stream.
///
/// The header list is frozen at the first body write (or the first explicit
/// `set_status` call); header changes after that point are ignored, the
/// same way a head-of-line HTTP response cannot be amended once bytes have
/// gone out.
#[derive(Debug)]
pub struct ResponseSink {
    stream_id: StreamId,
    status: u16,
    headers: Vec<(String, String)>,
    frozen: Option<HeaderList>,
    body: BytesMut,
}

impl ResponseSink {
    /// Create a sink for a stream.
    pub fn new(stream_id: StreamId) -> Self {
        ResponseSink {
            stream_id,
            status: 200,
            headers: Vec::new(),
            frozen: None,
            body: BytesMut::new(),
        }
    }

    /// Stream this response belongs to.
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Add a response header. No effect once the header list is frozen.
    pub fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.frozen.is_none() {
            self.headers.push((name.into(), value.into()));
        }
    }

    /// Set the status code and freeze the header list.
    pub fn set_status(&mut self, status: u16) {
        if self.frozen.is_some() {
            return;
        }

        self.status = status;

        let mut list = HeaderList::new();
        list.push(HeaderField::new(":status", status.to_string()));
        for (name, value) in &self.headers {
            list.push(HeaderField::new(name.to_ascii_lowercase(), value.clone()));
        }
        self.frozen = Some(list);
    }

    /// Append body bytes, freezing the header list with the current status
    /// on the first write.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.frozen.is_none() {
            self.set_status(self.status);
        }
        self.body.extend_from_slice(bytes);
    }

    /// Translate the finished response into frames.
    ///
    /// The header list starts with `:status`, followed by the user headers
    /// lower-cased; `content-type` is sniffed from the body when absent and
    /// `content-length` defaults to the body length. An empty body folds
    /// END_STREAM into the HEADERS frame; otherwise a single DATA frame
    /// carries the body and the END_STREAM flag.
    pub fn into_frames(mut self) -> Vec<Frame> {
        if self.frozen.is_none() {
            self.set_status(self.status);
        }
        let mut list = self.frozen.expect("header list frozen above");
        let body = self.body.freeze();

        if !list.contains("content-type") {
            list.push(HeaderField::new("content-type", sniff_content_type(&body)));
        }

        if !list.contains("content-length") {
            list.push(HeaderField::new("content-length", body.len().to_string()));
        }

        let mut headers_flags = FrameFlags::from_u8(FrameFlags::END_HEADERS);
        if body.is_empty() {
            headers_flags.set(FrameFlags::END_STREAM);
        }

        let headers_frame = Frame::new(
            FrameType::Headers,
            headers_flags,
            self.stream_id,
            Bytes::from(hpack::encode_header_list(&list)),
        );

        if body.is_empty() {
            return vec![headers_frame];
        }

        vec![
            headers_frame,
            Frame::new(
                FrameType::Data,
                FrameFlags::from_u8(FrameFlags::END_STREAM),
                self.stream_id,
                body,
            ),
        ]
    }
}

impl std::io::Write for ResponseSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        ResponseSink::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Guess a `content-type` from leading body bytes.
///
/// A small signature table covering the formats a test server actually
/// returns; everything UTF-8 falls back to plain text, everything else to
/// an opaque octet stream. Only the first 512 bytes are considered.
pub fn sniff_content_type(body: &[u8]) -> &'static str {
    const SNIFF_LEN: usize = 512;

    let head = &body[..body.len().min(SNIFF_LEN)];
    let trimmed = trim_ascii_start(head);

    for prefix in [&b"<!DOCTYPE HTML"[..], b"<HTML", b"<HEAD", b"<BODY"] {
        if starts_with_ignore_case(trimmed, prefix) {
            return "text/html; charset=utf-8";
        }
    }

    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if head.starts_with(b"\xff\xd8\xff") {
        return "image/jpeg";
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if head.starts_with(b"%PDF-") {
        return "application/pdf";
    }

    if std::str::from_utf8(head).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn starts_with_ignore_case(bytes: &[u8], prefix: &[u8]) -> bool {
    bytes.len() >= prefix.len()
        && bytes
            .iter()
            .zip(prefix)
            .all(|(b, p)| b.eq_ignore_ascii_case(p))
}
