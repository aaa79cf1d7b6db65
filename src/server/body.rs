//! Request body framing.
//!
//! Exposes a request body as a sequential byte stream in one of three
//! framings: `Content-Length` (exactly n bytes), `Transfer-Encoding: chunked`
//! (size-prefixed chunks, optional trailers, terminating zero chunk), or no
//! body at all. The reader is idempotent at end of stream, and surplus bytes
//! in the source buffer belong to the next request on the connection.

use crate::errors::{ErrorKind, MalformedKind};
use crate::http::types::HeaderMap;
use crate::server::stream::SourceBuffer;
use memchr::memchr;
use std::io;

// A chunk-size line plus extensions comfortably fits well under this.
const MAX_CHUNK_LINE: usize = 1024;
const MAX_TRAILER_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Framing {
    Empty,
    ContentLength,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkState {
    Size,
    Data,
    DataEnd,
    Trailers,
}

/// Streaming reader for one request body.
pub(crate) struct BodyReader {
    framing: Framing,
    /// Content-Length: bytes left overall. Chunked: bytes left in the chunk.
    remaining: usize,
    state: ChunkState,
    total: usize,
    max_body_bytes: usize,
    finished: bool,
}

impl BodyReader {
    /// Derives the framing from request headers.
    ///
    /// `Transfer-Encoding: chunked` wins over `Content-Length`; a
    /// Transfer-Encoding without a final `chunked` coding, a non-numeric
    /// Content-Length, or conflicting duplicate Content-Length values are
    /// malformed. A declared length over `max_body_bytes` is rejected up
    /// front.
    pub(crate) fn from_headers(
        headers: &HeaderMap,
        max_body_bytes: usize,
    ) -> Result<Self, ErrorKind> {
        let encodings = headers.get_all("transfer-encoding");
        if !encodings.is_empty() {
            let last = encodings
                .iter()
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .last();
            return match last {
                Some(token) if token.eq_ignore_ascii_case("chunked") => Ok(Self {
                    framing: Framing::Chunked,
                    remaining: 0,
                    state: ChunkState::Size,
                    total: 0,
                    max_body_bytes,
                    finished: false,
                }),
                _ => Err(ErrorKind::Malformed(MalformedKind::TransferEncoding)),
            };
        }

        let lengths = headers.get_all("content-length");
        let Some(first) = lengths.first() else {
            return Ok(Self {
                framing: Framing::Empty,
                remaining: 0,
                state: ChunkState::Size,
                total: 0,
                max_body_bytes,
                finished: true,
            });
        };

        if lengths.iter().any(|l| l != first) {
            return Err(ErrorKind::Malformed(MalformedKind::ContentLength));
        }
        let length = parse_decimal(first.as_bytes())
            .ok_or(ErrorKind::Malformed(MalformedKind::ContentLength))?;
        if length > max_body_bytes {
            return Err(ErrorKind::BodyTooLarge);
        }

        Ok(Self {
            framing: if length == 0 {
                Framing::Empty
            } else {
                Framing::ContentLength
            },
            remaining: length,
            state: ChunkState::Size,
            total: 0,
            max_body_bytes,
            finished: length == 0,
        })
    }

    pub(crate) fn is_chunked(&self) -> bool {
        self.framing == Framing::Chunked
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of bytes known to remain (Content-Length framing only).
    fn declared_remaining(&self) -> Option<usize> {
        match self.framing {
            Framing::ContentLength => Some(self.remaining),
            Framing::Empty => Some(0),
            Framing::Chunked => None,
        }
    }

    /// Reads the next run of body bytes.
    ///
    /// Returns `None` at end of stream, repeatedly. Trailers after a chunked
    /// body's zero chunk are appended to `trailers`.
    pub(crate) async fn read_chunk<'s>(
        &mut self,
        src: &'s mut SourceBuffer,
        trailers: &mut HeaderMap,
    ) -> Result<Option<&'s [u8]>, ErrorKind> {
        if self.is_finished() {
            return Ok(None);
        }

        match self.framing {
            Framing::Empty => {
                self.finished = true;
                Ok(None)
            }
            Framing::ContentLength => {
                if src.is_empty() {
                    fill_or_eof(src).await?;
                }
                let count = self.remaining.min(src.len());
                self.remaining -= count;
                if self.remaining == 0 {
                    self.finished = true;
                }
                Ok(Some(src.take(count)))
            }
            Framing::Chunked => self.read_chunked(src, trailers).await,
        }
    }

    /// Like [`read_chunk`](Self::read_chunk), but returns only the byte
    /// count; the caller re-slices via [`SourceBuffer::taken`]. Lets callers
    /// update their own state on the error path without holding a borrow.
    pub(crate) async fn read_span(
        &mut self,
        src: &mut SourceBuffer,
        trailers: &mut HeaderMap,
    ) -> Result<Option<usize>, ErrorKind> {
        Ok(self.read_chunk(src, trailers).await?.map(<[u8]>::len))
    }

    async fn read_chunked<'s>(
        &mut self,
        src: &'s mut SourceBuffer,
        trailers: &mut HeaderMap,
    ) -> Result<Option<&'s [u8]>, ErrorKind> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let line_len = ensure_line(src, MAX_CHUNK_LINE).await?;
                    let size = parse_chunk_size(&src.available()[..line_len])
                        .ok_or(ErrorKind::Malformed(MalformedKind::TransferEncoding))?;
                    src.consume(line_len + 2);

                    if size == 0 {
                        self.state = ChunkState::Trailers;
                        continue;
                    }
                    self.total = self
                        .total
                        .checked_add(size)
                        .filter(|&total| total <= self.max_body_bytes)
                        .ok_or(ErrorKind::BodyTooLarge)?;
                    self.remaining = size;
                    self.state = ChunkState::Data;
                }
                ChunkState::Data => {
                    if src.is_empty() {
                        fill_or_eof(src).await?;
                    }
                    let count = self.remaining.min(src.len());
                    self.remaining -= count;
                    if self.remaining == 0 {
                        self.state = ChunkState::DataEnd;
                    }
                    return Ok(Some(src.take(count)));
                }
                ChunkState::DataEnd => {
                    while src.len() < 2 {
                        fill_or_eof(src).await?;
                    }
                    if &src.available()[..2] != b"\r\n" {
                        return Err(ErrorKind::Malformed(MalformedKind::TransferEncoding));
                    }
                    src.consume(2);
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let line_len = ensure_line(src, MAX_TRAILER_BYTES).await?;
                    if line_len == 0 {
                        src.consume(2);
                        self.finished = true;
                        return Ok(None);
                    }
                    let (name, value) = parse_trailer(&src.available()[..line_len])
                        .ok_or(ErrorKind::Malformed(MalformedKind::Header))?;
                    trailers.add(name, value);
                    src.consume(line_len + 2);
                }
            }
        }
    }

    /// Discards any unread body bytes before the next request on the
    /// connection.
    ///
    /// Returns `Ok(false)` when more than `limit` bytes would have to be
    /// discarded; the caller closes the connection instead.
    pub(crate) async fn drain(
        &mut self,
        src: &mut SourceBuffer,
        trailers: &mut HeaderMap,
        limit: usize,
    ) -> Result<bool, ErrorKind> {
        if self.is_finished() {
            return Ok(true);
        }
        if let Some(remaining) = self.declared_remaining() {
            if remaining > limit {
                return Ok(false);
            }
        }

        let mut discarded = 0usize;
        while let Some(bytes) = self.read_chunk(src, trailers).await? {
            discarded += bytes.len();
            if discarded > limit {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Fills the source, translating a clean peer close into a truncation error.
async fn fill_or_eof(src: &mut SourceBuffer) -> Result<(), ErrorKind> {
    if src.fill().await? == 0 {
        return Err(ErrorKind::Io(
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the request body completed",
            )
            .into(),
        ));
    }
    Ok(())
}

/// Waits until a full CRLF-terminated line is buffered; returns its length
/// excluding the CRLF.
async fn ensure_line(src: &mut SourceBuffer, max: usize) -> Result<usize, ErrorKind> {
    loop {
        if let Some(lf) = memchr(b'\n', src.available()) {
            if lf == 0 || src.available()[lf - 1] != b'\r' {
                return Err(ErrorKind::Malformed(MalformedKind::TransferEncoding));
            }
            return Ok(lf - 1);
        }
        if src.len() > max {
            return Err(ErrorKind::Malformed(MalformedKind::TransferEncoding));
        }
        fill_or_eof(src).await?;
    }
}

/// Parses a chunk-size line; chunk extensions after `;` are ignored.
fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let digits = match memchr(b';', line) {
        Some(split) => &line[..split],
        None => line,
    };
    let digits = trim_ows(digits);
    if digits.is_empty() || digits.len() > 16 {
        return None;
    }

    let mut size = 0usize;
    for &byte in digits {
        let value = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => return None,
        };
        size = size.checked_mul(16)?.checked_add(value as usize)?;
    }
    Some(size)
}

fn parse_trailer(line: &[u8]) -> Option<(String, String)> {
    let colon = memchr(b':', line)?;
    let name = std::str::from_utf8(&line[..colon]).ok()?;
    if name.is_empty() || name.ends_with(' ') || name.ends_with('\t') {
        return None;
    }
    let value = std::str::from_utf8(trim_ows(&line[colon + 1..])).ok()?;
    Some((name.to_owned(), value.to_owned()))
}

fn trim_ows(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}

pub(crate) fn parse_decimal(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut result = 0usize;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::stream::{split, SourceBuffer, WireWriter};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    struct Wire {
        source: SourceBuffer,
        _sink: WireWriter,
        client: DuplexStream,
    }

    async fn wire(bytes: &[u8]) -> Wire {
        let (server, mut client) = duplex(256 * 1024);
        let (source, sink) = split(
            Box::new(server),
            Vec::new(),
            Duration::from_millis(200),
            Duration::from_secs(1),
        );
        client.write_all(bytes).await.unwrap();
        Wire {
            source,
            _sink: sink,
            client,
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.add(*name, *value);
        }
        map
    }

    async fn read_all(reader: &mut BodyReader, src: &mut SourceBuffer) -> (Vec<u8>, HeaderMap) {
        let mut trailers = HeaderMap::new();
        let mut out = Vec::new();
        while let Some(bytes) = reader.read_chunk(src, &mut trailers).await.unwrap() {
            out.extend_from_slice(bytes);
        }
        (out, trailers)
    }

    #[test]
    fn framing_selection() {
        assert!(!BodyReader::from_headers(&headers(&[]), usize::MAX)
            .unwrap()
            .is_chunked());
        assert!(BodyReader::from_headers(&headers(&[]), usize::MAX)
            .unwrap()
            .is_finished());

        let reader =
            BodyReader::from_headers(&headers(&[("Content-Length", "5")]), usize::MAX).unwrap();
        assert!(!reader.is_finished());

        let reader =
            BodyReader::from_headers(&headers(&[("Transfer-Encoding", "chunked")]), usize::MAX)
                .unwrap();
        assert!(reader.is_chunked());

        // Chunked must be the final coding.
        assert_eq!(
            BodyReader::from_headers(&headers(&[("Transfer-Encoding", "gzip")]), usize::MAX)
                .err(),
            Some(ErrorKind::Malformed(MalformedKind::TransferEncoding))
        );

        assert_eq!(
            BodyReader::from_headers(&headers(&[("Content-Length", "12abc")]), usize::MAX).err(),
            Some(ErrorKind::Malformed(MalformedKind::ContentLength))
        );
        assert_eq!(
            BodyReader::from_headers(
                &headers(&[("Content-Length", "5"), ("Content-Length", "6")]),
                usize::MAX
            )
            .err(),
            Some(ErrorKind::Malformed(MalformedKind::ContentLength))
        );
        assert_eq!(
            BodyReader::from_headers(&headers(&[("Content-Length", "100")]), 99).err(),
            Some(ErrorKind::BodyTooLarge)
        );
    }

    #[tokio::test]
    async fn content_length_yields_exactly_n() {
        let mut wire = wire(b"hello worldEXTRA").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Content-Length", "11")]), usize::MAX).unwrap();

        let (body, _) = read_all(&mut reader, &mut wire.source).await;
        assert_eq!(body, b"hello world");
        assert!(reader.is_finished());
        // Surplus bytes stay buffered for the next request.
        assert_eq!(wire.source.available(), b"EXTRA");

        // Idempotent at end of stream.
        let mut trailers = HeaderMap::new();
        assert_eq!(
            reader
                .read_chunk(&mut wire.source, &mut trailers)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn content_length_truncation_is_an_error() {
        let mut wire = wire(b"short").await;
        wire.client.shutdown().await.unwrap();
        drop(wire.client);

        let mut reader =
            BodyReader::from_headers(&headers(&[("Content-Length", "42")]), usize::MAX).unwrap();
        let mut trailers = HeaderMap::new();

        // First chunk delivers the available bytes.
        let first = reader
            .read_chunk(&mut wire.source, &mut trailers)
            .await
            .unwrap();
        assert_eq!(first, Some(&b"short"[..]));

        // Then the close surfaces as an I/O truncation error.
        let err = reader
            .read_chunk(&mut wire.source, &mut trailers)
            .await
            .unwrap_err();
        assert!(matches!(err, ErrorKind::Io(_)));
    }

    #[tokio::test]
    async fn chunked_decodes_and_ends_on_zero_chunk() {
        let mut wire = wire(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\nNEXT").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Transfer-Encoding", "chunked")]), usize::MAX)
                .unwrap();

        let (body, trailers) = read_all(&mut reader, &mut wire.source).await;
        assert_eq!(body, b"hello world");
        assert!(trailers.is_empty());
        assert_eq!(wire.source.available(), b"NEXT");
    }

    #[tokio::test]
    async fn chunked_extensions_and_hex_sizes() {
        let mut wire = wire(b"A;ext=1\r\n0123456789\r\n0\r\n\r\n").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Transfer-Encoding", "chunked")]), usize::MAX)
                .unwrap();

        let (body, _) = read_all(&mut reader, &mut wire.source).await;
        assert_eq!(body, b"0123456789");
    }

    #[tokio::test]
    async fn chunked_trailers_are_collected() {
        let mut wire =
            wire(b"4\r\nbody\r\n0\r\nX-Checksum: abc123\r\nX-Extra: 1\r\n\r\n").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Transfer-Encoding", "chunked")]), usize::MAX)
                .unwrap();

        let (body, trailers) = read_all(&mut reader, &mut wire.source).await;
        assert_eq!(body, b"body");
        assert_eq!(trailers.get("x-checksum"), Some("abc123"));
        assert_eq!(trailers.get("x-extra"), Some("1"));
    }

    #[tokio::test]
    async fn chunked_missing_data_crlf_is_malformed() {
        let mut wire = wire(b"4\r\nbodyXX0\r\n\r\n").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Transfer-Encoding", "chunked")]), usize::MAX)
                .unwrap();
        let mut trailers = HeaderMap::new();

        assert!(reader
            .read_chunk(&mut wire.source, &mut trailers)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            reader
                .read_chunk(&mut wire.source, &mut trailers)
                .await
                .unwrap_err(),
            ErrorKind::Malformed(MalformedKind::TransferEncoding)
        );
    }

    #[tokio::test]
    async fn chunked_total_respects_body_limit() {
        let mut wire = wire(b"5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Transfer-Encoding", "chunked")]), 8).unwrap();
        let mut trailers = HeaderMap::new();

        assert!(reader
            .read_chunk(&mut wire.source, &mut trailers)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            reader
                .read_chunk(&mut wire.source, &mut trailers)
                .await
                .unwrap_err(),
            ErrorKind::BodyTooLarge
        );
    }

    #[tokio::test]
    async fn drain_discards_within_limit() {
        let mut wire = wire(b"0123456789NEXT").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Content-Length", "10")]), usize::MAX).unwrap();
        let mut trailers = HeaderMap::new();

        assert!(reader
            .drain(&mut wire.source, &mut trailers, 64)
            .await
            .unwrap());
        assert_eq!(wire.source.available(), b"NEXT");
    }

    #[tokio::test]
    async fn drain_refuses_oversized_remainder() {
        let mut wire = wire(b"").await;
        let mut reader =
            BodyReader::from_headers(&headers(&[("Content-Length", "1000000")]), usize::MAX)
                .unwrap();
        let mut trailers = HeaderMap::new();

        assert!(!reader
            .drain(&mut wire.source, &mut trailers, 64)
            .await
            .unwrap());
    }

    #[test]
    fn chunk_size_lines() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<usize>); 8] = [
            (b"0",          Some(0)),
            (b"5",          Some(5)),
            (b"a",          Some(10)),
            (b"FF",         Some(255)),
            (b"1f4;ext=x",  Some(500)),
            (b"",           None),
            (b"xyz",        None),
            (b"5 5",        None),
        ];

        for (line, expected) in cases {
            assert_eq!(parse_chunk_size(line), expected);
        }
    }
}
