//! HTTP response builder and body sink.
//!
//! The handler sets a status and headers, then writes body bytes. The wire
//! framing is decided at the first flush:
//!
//! 1. A handler-declared `Content-Length` is used as-is; bytes written past
//!    it are truncated and the connection closes after the response.
//! 2. Nothing written and no declaration: `Content-Length: 0`.
//! 3. Body fully buffered before the first flush: automatic `Content-Length`.
//! 4. Flushed before completion: `Transfer-Encoding: chunked`.
//!
//! Status and headers are immutable once the preamble is on the wire. Every
//! response carries an explicit `Connection` header echoing the negotiated
//! keep-alive decision.

use crate::errors::ErrorKind;
use crate::http::types::{reason_phrase, Charset, HeaderMap, Version};
use crate::server::body::parse_decimal;
use crate::server::stream::WireWriter;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Framing {
    ContentLength(usize),
    Chunked,
}

/// Response builder for one request, handed to the handler.
///
/// # Examples
/// ```ignore
/// async fn handle(&self, req: &mut Request<'_>, resp: &mut Response<'_>) -> Result<(), HandlerError> {
///     resp.set_status(200);
///     resp.set_header("Content-Type", "text/plain");
///     resp.write(b"Hello world").await?;
///     Ok(())
/// }
/// ```
pub struct Response<'c> {
    wire: &'c mut WireWriter,
    version: Version,
    negotiated_keep_alive: bool,
    status: u16,
    headers: HeaderMap,
    buf: Vec<u8>,
    write_buffer_size: usize,
    framing: Option<Framing>,
    /// Body bytes accepted so far, buffered or flushed.
    accepted: usize,
    preamble_sent: bool,
    finished: bool,
    truncated: bool,
    underfilled: bool,
}

impl<'c> Response<'c> {
    pub(crate) fn new(
        wire: &'c mut WireWriter,
        version: Version,
        negotiated_keep_alive: bool,
        buf: Vec<u8>,
        write_buffer_size: usize,
    ) -> Self {
        Self {
            wire,
            version,
            negotiated_keep_alive,
            status: 200,
            headers: HeaderMap::new(),
            buf,
            write_buffer_size,
            framing: None,
            accepted: 0,
            preamble_sent: false,
            finished: false,
            truncated: false,
            underfilled: false,
        }
    }

    /// Sets the status code. Defaults to `200` when never called.
    ///
    /// # Panics
    /// Panics in `debug` mode when called after the preamble was flushed.
    #[track_caller]
    pub fn set_status(&mut self, status: u16) {
        debug_assert!(!self.preamble_sent, "status is immutable after the first flush");
        self.status = status;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Replaces every value of a response header.
    ///
    /// # Panics
    /// Panics in `debug` mode when called after the preamble was flushed.
    #[track_caller]
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        debug_assert!(!self.preamble_sent, "headers are immutable after the first flush");
        self.headers.set(name, value);
    }

    /// Appends a response header, keeping existing values.
    ///
    /// # Panics
    /// Panics in `debug` mode when called after the preamble was flushed.
    #[track_caller]
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        debug_assert!(!self.preamble_sent, "headers are immutable after the first flush");
        self.headers.add(name, value);
    }

    /// Declares the body length, like `set_header("Content-Length", ...)`.
    #[track_caller]
    pub fn set_content_length(&mut self, length: usize) {
        self.set_header("Content-Length", length.to_string());
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Appends body bytes to the response.
    ///
    /// Buffered until `write_buffer_size`, then streamed. Bytes beyond a
    /// declared `Content-Length` are discarded and the connection closes
    /// after the response.
    pub async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        debug_assert!(!self.finished, "response already finished");

        let bytes = match self.declared_length() {
            Some(declared) => {
                let room = declared.saturating_sub(self.accepted);
                if bytes.len() > room {
                    self.truncated = true;
                }
                &bytes[..room.min(bytes.len())]
            }
            None => bytes,
        };
        if bytes.is_empty() {
            return Ok(());
        }

        self.accepted += bytes.len();
        self.buf.extend_from_slice(bytes);
        if self.buf.len() >= self.write_buffer_size {
            self.flush_body(false).await.map_err(wire_io_error)?;
        }
        Ok(())
    }

    /// Encodes `text` in the response charset and writes it as body bytes.
    ///
    /// The charset comes from the `charset` parameter of the response
    /// `Content-Type` header; the default is UTF-8. A declared
    /// `Content-Length` must be measured in the target encoding's bytes.
    pub async fn write_str(&mut self, text: &str) -> io::Result<()> {
        let encoded = self.charset().encode(text);
        self.write(&encoded).await
    }

    /// Forces the preamble and any buffered body bytes onto the wire.
    ///
    /// Flushing before the body is complete commits the response to chunked
    /// framing unless a `Content-Length` was declared.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.flush_body(false).await.map_err(wire_io_error)?;
        self.wire.flush().await.map_err(wire_io_error)
    }

    /// Character encoding for [`write_str`](Self::write_str).
    pub fn charset(&self) -> Charset {
        self.headers
            .get("content-type")
            .and_then(|value| {
                value.split(';').skip(1).find_map(|param| {
                    let (name, value) = param.trim().split_once('=')?;
                    if name.trim().eq_ignore_ascii_case("charset") {
                        Charset::from_label(value)
                    } else {
                        None
                    }
                })
            })
            .unwrap_or(Charset::Utf8)
    }

    /// Completes the response: decides framing if still undecided, flushes
    /// everything, and terminates chunked bodies.
    pub(crate) async fn finish(&mut self) -> Result<(), ErrorKind> {
        debug_assert!(!self.finished);
        self.flush_body(true).await?;

        if self.framing == Some(Framing::Chunked) {
            self.wire.write_all(b"0\r\n\r\n").await?;
        }
        if let Some(Framing::ContentLength(declared)) = self.framing {
            if self.accepted < declared {
                self.underfilled = true;
            }
        }
        self.wire.flush().await?;
        self.finished = true;
        Ok(())
    }

    /// Whether any bytes reached the wire. Once true, the error path must
    /// close the connection instead of writing a 500.
    pub(crate) fn wire_touched(&self) -> bool {
        self.preamble_sent
    }

    pub(crate) fn used_chunked(&self) -> bool {
        self.framing == Some(Framing::Chunked)
    }

    /// The declared or decided Content-Length framing violated the actual
    /// body size; the connection cannot be reused.
    pub(crate) fn framing_violated(&self) -> bool {
        self.truncated || self.underfilled
    }

    /// Final keep-alive decision for the connection FSM.
    pub(crate) fn keep_alive(&self) -> bool {
        self.negotiated_keep_alive && !self.handler_requested_close() && !self.framing_violated()
    }

    /// Releases the body buffer for pooling.
    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.buf
    }

    fn handler_requested_close(&self) -> bool {
        self.headers
            .get("connection")
            .is_some_and(|value| value.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
    }

    fn declared_length(&self) -> Option<usize> {
        match self.framing {
            Some(Framing::ContentLength(length)) => Some(length),
            Some(Framing::Chunked) => None,
            None => parse_decimal(self.headers.get("content-length")?.as_bytes()),
        }
    }

    /// Writes buffered body bytes, sending the preamble first if needed.
    async fn flush_body(&mut self, finishing: bool) -> Result<(), ErrorKind> {
        if !self.preamble_sent {
            self.decide_framing(finishing);
            let preamble = self.render_preamble();
            self.wire.write_all(&preamble).await?;
            self.preamble_sent = true;
        }

        if self.buf.is_empty() {
            return Ok(());
        }
        match self.framing {
            Some(Framing::ContentLength(_)) => {
                self.wire.write_all(&self.buf).await?;
            }
            Some(Framing::Chunked) => {
                let header = format!("{:x}\r\n", self.buf.len());
                self.wire.write_all(header.as_bytes()).await?;
                self.wire.write_all(&self.buf).await?;
                self.wire.write_all(b"\r\n").await?;
            }
            None => unreachable!("framing decided above"),
        }
        self.buf.clear();
        Ok(())
    }

    fn decide_framing(&mut self, finishing: bool) {
        let declared = self.declared_length();
        self.framing = Some(match declared {
            Some(declared) => {
                if self.buf.len() > declared {
                    self.truncated = true;
                    self.buf.truncate(declared);
                    self.accepted = declared;
                }
                Framing::ContentLength(declared)
            }
            None if finishing => {
                self.headers.set("Content-Length", self.buf.len().to_string());
                Framing::ContentLength(self.buf.len())
            }
            None => {
                self.headers.set("Transfer-Encoding", "chunked");
                Framing::Chunked
            }
        });
    }

    fn render_preamble(&mut self) -> Vec<u8> {
        // Echo the keep-alive decision on every response.
        let connection = if self.keep_alive() { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);

        let mut out = Vec::with_capacity(128 + self.headers.len() * 32);
        out.extend_from_slice(self.version.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(reason_phrase(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

fn wire_io_error(kind: ErrorKind) -> io::Error {
    match kind {
        ErrorKind::Io(err) => err.0,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::stream::split;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn wire() -> (WireWriter, DuplexStream) {
        let (server, client) = duplex(256 * 1024);
        let (_source, sink) = split(
            Box::new(server),
            Vec::new(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        (sink, client)
    }

    async fn collect(mut sink: WireWriter, mut client: DuplexStream) -> Vec<u8> {
        sink.shutdown().await;
        drop(sink);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        out
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[tokio::test]
    async fn declared_content_length_is_used_verbatim() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        resp.set_status(200);
        resp.set_header("Content-Type", "text/plain");
        resp.set_header("Content-Length", "16");
        resp.write(b"{\"version\":\"42\"}").await.unwrap();
        resp.finish().await.unwrap();
        assert!(resp.keep_alive());
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert_eq!(out.matches("Content-Length").count(), 1);
        assert!(!out.contains("Transfer-Encoding"));
        assert!(out.contains("Connection: keep-alive\r\n"));
        assert!(out.ends_with("\r\n\r\n{\"version\":\"42\"}"));
    }

    #[tokio::test]
    async fn empty_body_gets_content_length_zero() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        resp.set_status(200);
        resp.finish().await.unwrap();
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.contains("Content-Length: 0\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn fully_buffered_body_gets_automatic_content_length() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        resp.set_status(404);
        resp.write(b"missing").await.unwrap();
        resp.finish().await.unwrap();
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("Content-Length: 7\r\n"));
        assert!(!out.contains("Transfer-Encoding"));
        assert!(out.ends_with("\r\n\r\nmissing"));
    }

    #[tokio::test]
    async fn early_flush_commits_to_chunked() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        resp.set_status(200);
        resp.write(b"first").await.unwrap();
        resp.flush().await.unwrap();
        resp.write(b"second").await.unwrap();
        resp.finish().await.unwrap();
        assert!(resp.used_chunked());
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!out.contains("Content-Length"));
        assert!(out.contains("5\r\nfirst\r\n"));
        assert!(out.contains("6\r\nsecond\r\n"));
        assert!(out.ends_with("0\r\n\r\n"));
    }

    #[tokio::test]
    async fn large_buffered_body_streams_chunked() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        // Exceeds the 64-byte buffer without an explicit flush.
        resp.write(&[b'x'; 100]).await.unwrap();
        resp.write(&[b'y'; 10]).await.unwrap();
        resp.finish().await.unwrap();
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.contains("Transfer-Encoding: chunked\r\n"));
        assert!(out.ends_with("0\r\n\r\n"));
    }

    #[tokio::test]
    async fn http10_close_echo() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http10, false, Vec::new(), 64);
        resp.set_status(200);
        resp.write(b"bye").await.unwrap();
        resp.finish().await.unwrap();
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(out.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn writes_past_declared_length_are_truncated() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        resp.set_content_length(4);
        resp.write(b"12345678").await.unwrap();
        resp.finish().await.unwrap();
        assert!(resp.framing_violated());
        assert!(!resp.keep_alive());
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.contains("Content-Length: 4\r\n"));
        assert!(out.ends_with("\r\n\r\n1234"));
        assert!(out.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn underfilled_declared_length_is_a_violation() {
        let (mut sink, _client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        resp.set_content_length(10);
        resp.write(b"short").await.unwrap();
        resp.finish().await.unwrap();

        assert!(resp.framing_violated());
        assert!(!resp.keep_alive());
    }

    #[tokio::test]
    async fn handler_connection_close_wins() {
        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 64);
        resp.set_header("Connection", "close");
        resp.write(b"x").await.unwrap();
        resp.finish().await.unwrap();
        assert!(!resp.keep_alive());
        drop(resp);

        let out = text(&collect(sink, client).await);
        assert!(out.contains("Connection: close\r\n"));
        assert_eq!(out.matches("Connection").count(), 1);
    }

    #[tokio::test]
    async fn utf16_text_writer_counts_encoded_bytes() {
        let body_text = "{\"version\":\"42\"}";
        let encoded_len = Charset::Utf16.encode(body_text).len();

        let (mut sink, client) = wire();
        let mut resp = Response::new(&mut sink, Version::Http11, true, Vec::new(), 1024);
        resp.set_header("Content-Type", "text/plain; charset=UTF-16");
        resp.set_content_length(encoded_len);
        assert_eq!(resp.charset(), Charset::Utf16);
        resp.write_str(body_text).await.unwrap();
        resp.finish().await.unwrap();
        assert!(!resp.framing_violated());
        drop(resp);

        let out = collect(sink, client).await;
        let split_at = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let (head, body) = out.split_at(split_at);
        assert!(text(head).contains(&format!("Content-Length: {encoded_len}\r\n")));
        assert_eq!(body.len(), encoded_len);
        assert_eq!(Charset::Utf16.decode(body), body_text);
    }
}
