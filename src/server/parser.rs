//! Incremental HTTP/1.1 preamble parser.
//!
//! Fed the connection's accumulated read buffer, the parser emits one of
//! three statuses: more bytes are needed, a complete request head with the
//! number of bytes it consumed, or a malformed verdict. Parsing is strict
//! RFC 7230: CRLF line endings, token method and header names, visible-ASCII
//! request targets, no bare CR anywhere.
//!
//! The parser is restartable. After a malformed verdict the connection may
//! discard bytes up to the next `CRLF CRLF` (see [`resync`]) and parse again,
//! which is how a bad preamble on a keep-alive connection is skipped without
//! killing the requests queued behind it.

use crate::errors::MalformedKind;
use crate::http::query::percent_decode;
use crate::http::request::RequestHead;
use crate::http::types::{HeaderMap, Method, Version};
use memchr::{memchr, memmem};

/// Outcome of one [`PreambleParser::parse`] attempt.
#[derive(Debug, PartialEq)]
pub enum ParseStatus {
    /// The buffer does not yet hold a full preamble.
    NeedMore,
    /// A complete request head; `consumed` bytes belong to it.
    Complete {
        head: RequestHead,
        consumed: usize,
    },
    Malformed(MalformedKind),
}

/// The preamble parser, usable standalone for request-head parsing.
///
/// # Examples
///
/// ```
/// use hearth_web::{ParseStatus, PreambleParser};
///
/// let parser = PreambleParser::new(128 * 1024);
/// match parser.parse(b"GET /api HTTP/1.1\r\nHost: localhost\r\n\r\n") {
///     ParseStatus::Complete { head, consumed } => {
///         assert_eq!(head.path(), "/api");
///         assert_eq!(consumed, 38);
///     }
///     other => panic!("{other:?}"),
/// }
/// ```
pub struct PreambleParser {
    max_preamble_bytes: usize,
}

impl PreambleParser {
    /// Creates a parser rejecting preambles over `max_preamble_bytes`.
    pub fn new(max_preamble_bytes: usize) -> Self {
        Self { max_preamble_bytes }
    }

    /// Attempts to parse one request preamble from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseStatus {
        match memmem::find(buf, b"\r\n\r\n") {
            Some(boundary) => {
                let consumed = boundary + 4;
                if consumed > self.max_preamble_bytes {
                    return ParseStatus::Malformed(MalformedKind::PreambleTooLarge);
                }
                match parse_preamble(&buf[..boundary]) {
                    Ok(head) => ParseStatus::Complete { head, consumed },
                    Err(kind) => ParseStatus::Malformed(kind),
                }
            }
            None if buf.len() > self.max_preamble_bytes => {
                ParseStatus::Malformed(MalformedKind::PreambleTooLarge)
            }
            None => ParseStatus::NeedMore,
        }
    }
}

/// Bytes to discard to skip past the next `CRLF CRLF`, if one is buffered.
pub(crate) fn resync(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, b"\r\n\r\n").map(|boundary| boundary + 4)
}

/// Parses `request-line CRLF *(header CRLF)` (terminator already stripped).
fn parse_preamble(block: &[u8]) -> Result<RequestHead, MalformedKind> {
    let mut rest = block;

    let line_end = memmem::find(rest, b"\r\n").unwrap_or(rest.len());
    let (method, path, query, version) = parse_request_line(&rest[..line_end])?;
    rest = &rest[(line_end + 2).min(rest.len())..];

    let mut headers = HeaderMap::with_capacity(16);
    while !rest.is_empty() {
        let line_end = memmem::find(rest, b"\r\n").unwrap_or(rest.len());
        parse_header_line(&rest[..line_end], &mut headers)?;
        rest = &rest[(line_end + 2).min(rest.len())..];
    }

    Ok(RequestHead {
        method,
        path,
        query,
        version,
        headers,
    })
}

type RequestLine = (Method, String, Option<String>, Version);

fn parse_request_line(line: &[u8]) -> Result<RequestLine, MalformedKind> {
    // METHOD SP request-target SP HTTP-version
    let method_end = memchr(b' ', line).ok_or(MalformedKind::RequestLine)?;
    let method_token = &line[..method_end];
    if method_token.is_empty() || !method_token.iter().all(|&b| is_tchar(b)) {
        return Err(MalformedKind::Method);
    }
    let method = Method::from_token(method_token).ok_or(MalformedKind::Method)?;

    let rest = &line[method_end + 1..];
    let version_start = rest
        .iter()
        .rposition(|&b| b == b' ')
        .ok_or(MalformedKind::RequestLine)?;
    let version =
        Version::from_bytes(&rest[version_start + 1..]).ok_or(MalformedKind::Version)?;

    let target = &rest[..version_start];
    if target.is_empty() || !target.iter().all(|&b| (0x21..=0x7E).contains(&b)) {
        return Err(MalformedKind::Target);
    }

    let (path_raw, query) = match memchr(b'?', target) {
        Some(split) => (
            &target[..split],
            Some(String::from_utf8_lossy(&target[split + 1..]).into_owned()),
        ),
        None => (target, None),
    };
    // `+` is not space in a path, only in query/form parsing.
    let path = String::from_utf8_lossy(&percent_decode(path_raw, false)).into_owned();

    Ok((method, path, query, version))
}

fn parse_header_line(line: &[u8], headers: &mut HeaderMap) -> Result<(), MalformedKind> {
    let colon = memchr(b':', line).ok_or(MalformedKind::Header)?;

    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| is_tchar(b)) {
        return Err(MalformedKind::Header);
    }

    let value = trim_ows(&line[colon + 1..]);
    // Printable ASCII, HTAB, and obs-text. A bare CR lands here and is
    // rejected, which is what makes a `\r\r\n` line malformed.
    if !value
        .iter()
        .all(|&b| b == b'\t' || (0x20..=0x7E).contains(&b) || b >= 0x80)
    {
        return Err(MalformedKind::Header);
    }

    headers.add(
        String::from_utf8_lossy(name).into_owned(),
        String::from_utf8_lossy(value).into_owned(),
    );
    Ok(())
}

#[inline(always)]
fn is_tchar(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
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
