//! Core HTTP protocol types and utilities

// METHOD

/// HTTP request methods
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET method - transfer a current representation of the target resource
    Get,
    /// POST method - perform resource-specific processing on the request payload
    Post,
    /// PUT method - replace all current representations of the target resource
    Put,
    /// DELETE method - remove all current representations of the target resource
    Delete,
    /// HEAD method - same as GET but without response body
    Head,
    /// OPTIONS method - describe the communication options for the target resource
    Options,
    /// PATCH method - apply partial modifications to a resource
    Patch,
    /// TRACE method - perform a message loop-back test along the request path
    Trace,
    /// CONNECT method - establish a tunnel to the server identified by the target
    Connect,
}

impl Method {
    #[inline(always)]
    pub(crate) fn from_token(src: &[u8]) -> Option<Self> {
        match src {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            b"PUT" => Some(Method::Put),
            b"DELETE" => Some(Method::Delete),
            b"HEAD" => Some(Method::Head),
            b"OPTIONS" => Some(Method::Options),
            b"PATCH" => Some(Method::Patch),
            b"TRACE" => Some(Method::Trace),
            b"CONNECT" => Some(Method::Connect),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0 [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// HTTP/1.1 [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
}

impl Version {
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"HTTP/1.1" => Some(Self::Http11),
            b"HTTP/1.0" => Some(Self::Http10),
            _ => None,
        }
    }

    /// The protocol literal, e.g. `HTTP/1.1`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

// STATUS

macro_rules! reason_phrases {
    ($( $num:literal => $str:literal; )+) => {
        /// The standard reason phrase for a status code.
        ///
        /// Unknown codes map to an empty phrase, which is legal on the wire.
        pub const fn reason_phrase(status: u16) -> &'static str {
            match status { $( $num => $str, )+ _ => "" }
        }
    }
}

reason_phrases! {
    100 => "Continue";
    101 => "Switching Protocols";
    200 => "OK";
    201 => "Created";
    202 => "Accepted";
    204 => "No Content";
    206 => "Partial Content";
    301 => "Moved Permanently";
    302 => "Found";
    303 => "See Other";
    304 => "Not Modified";
    307 => "Temporary Redirect";
    308 => "Permanent Redirect";
    400 => "Bad Request";
    401 => "Unauthorized";
    403 => "Forbidden";
    404 => "Not Found";
    405 => "Method Not Allowed";
    406 => "Not Acceptable";
    408 => "Request Timeout";
    409 => "Conflict";
    410 => "Gone";
    411 => "Length Required";
    412 => "Precondition Failed";
    413 => "Payload Too Large";
    414 => "URI Too Long";
    415 => "Unsupported Media Type";
    417 => "Expectation Failed";
    422 => "Unprocessable Entity";
    426 => "Upgrade Required";
    429 => "Too Many Requests";
    431 => "Request Header Fields Too Large";
    500 => "Internal Server Error";
    501 => "Not Implemented";
    502 => "Bad Gateway";
    503 => "Service Unavailable";
    504 => "Gateway Timeout";
    505 => "HTTP Version Not Supported";
}

// HEADER MAP

/// Multi-valued header map with case-insensitive lookup.
///
/// Names keep their arrival casing for retrieval and iteration; lookups
/// compare case-insensitively per
/// [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2). Duplicate
/// names preserve arrival order. Lookups are linear scans: header counts are
/// small and bounded by the preamble size limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header, preserving any existing values for the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Removes every value of `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value of `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name` in arrival order, case-insensitive.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// All `(name, value)` pairs in arrival order, arrival casing preserved.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// CHARSET

/// Character encodings supported by the request/response text paths.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    /// UTF-16 with byte order mark; encodes as BOM + big-endian code units,
    /// matching the common platform definition of the bare `UTF-16` label.
    Utf16,
    Iso88591,
    UsAscii,
}

impl Charset {
    /// Resolves a `charset=` label, case-insensitive, common aliases included.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches('"');
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "utf-16" | "utf16" => Some(Self::Utf16),
            "iso-8859-1" | "iso8859-1" | "latin1" => Some(Self::Iso88591),
            "us-ascii" | "ascii" => Some(Self::UsAscii),
            _ => None,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::Iso88591 => "ISO-8859-1",
            Self::UsAscii => "US-ASCII",
        }
    }

    /// Encodes `text` into this charset's bytes.
    ///
    /// Characters unrepresentable in ISO-8859-1 / US-ASCII become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Iso88591 => text
                .chars()
                .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                .collect(),
            Self::UsAscii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Self::Utf16 => {
                let mut out = Vec::with_capacity(2 + text.len() * 2);
                out.extend_from_slice(&[0xFE, 0xFF]);
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
                out
            }
        }
    }

    /// Decodes bytes in this charset, replacing invalid sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 | Self::UsAscii => String::from_utf8_lossy(bytes).into_owned(),
            Self::Iso88591 => bytes.iter().map(|&b| b as char).collect(),
            Self::Utf16 => {
                let (bytes, big_endian) = match bytes {
                    [0xFE, 0xFF, rest @ ..] => (rest, true),
                    [0xFF, 0xFE, rest @ ..] => (rest, false),
                    _ => (bytes, true),
                };
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        let pair = [pair[0], pair[1]];
                        if big_endian {
                            u16::from_be_bytes(pair)
                        } else {
                            u16::from_le_bytes(pair)
                        }
                    })
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

#[cfg(test)]
mod method_tests {
    use super::*;

    #[test]
    fn from_token() {
        #[rustfmt::skip]
        let cases: [(&[u8], Option<Method>); 12] = [
            (b"GET",     Some(Method::Get)),
            (b"POST",    Some(Method::Post)),
            (b"PUT",     Some(Method::Put)),
            (b"DELETE",  Some(Method::Delete)),
            (b"HEAD",    Some(Method::Head)),
            (b"OPTIONS", Some(Method::Options)),
            (b"PATCH",   Some(Method::Patch)),
            (b"TRACE",   Some(Method::Trace)),
            (b"CONNECT", Some(Method::Connect)),

            (b"get",     None),
            (b"GETX",    None),
            (b"",        None),
        ];

        for (token, expected) in cases {
            assert_eq!(Method::from_token(token), expected);
        }
    }
}


#[cfg(test)]
mod charset_tests {
    use super::*;

    #[test]
    fn labels_resolve() {
        #[rustfmt::skip]
        let cases = [
            ("UTF-8",      Some(Charset::Utf8)),
            ("utf8",       Some(Charset::Utf8)),
            ("UTF-16",     Some(Charset::Utf16)),
            ("ISO-8859-1", Some(Charset::Iso88591)),
            ("ISO8859-1",  Some(Charset::Iso88591)),
            ("latin1",     Some(Charset::Iso88591)),
            ("US-ASCII",   Some(Charset::UsAscii)),
            (" utf-8 ",    Some(Charset::Utf8)),
            ("\"UTF-8\"",  Some(Charset::Utf8)),
            ("koi8-r",     None),
        ];

        for (label, expected) in cases {
            assert_eq!(Charset::from_label(label), expected, "{label}");
        }
    }

    #[test]
    fn utf16_round_trip_includes_bom() {
        let text = "{\"version\":\"42\"}";
        let bytes = Charset::Utf16.encode(text);

        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(bytes.len(), 2 + text.len() * 2);
        assert_eq!(Charset::Utf16.decode(&bytes), text);
    }

    #[test]
    fn utf16_decodes_little_endian_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(Charset::Utf16.decode(&bytes), "hi");
    }

    #[test]
    fn latin1_replaces_unrepresentable() {
        assert_eq!(Charset::Iso88591.encode("héllo€"), b"h\xE9llo?");
        assert_eq!(Charset::Iso88591.decode(b"h\xE9llo"), "héllo");
    }
}
