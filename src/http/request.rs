//! The request view handed to handlers.

use crate::errors::ErrorKind;
use crate::http::query::{self, Params};
use crate::http::types::{Charset, HeaderMap, Method, Version};
use crate::server::body::BodyReader;
use crate::server::stream::SourceBuffer;
use std::io;
use std::net::{IpAddr, SocketAddr};

/// Parsed request line and headers, produced by the preamble parser.
///
/// Owns its strings; nothing here borrows the connection's read buffer, so
/// the head can outlive the parse that produced it without pinning the
/// buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
}

impl RequestHead {
    pub fn method(&self) -> Method {
        self.method
    }

    /// The percent-decoded path component.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string after `?`, undecoded.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// An HTTP request: the parsed preamble plus a lazy body stream.
///
/// A request is valid only inside [`Handler::handle`](crate::Handler::handle);
/// the body stream is tied to the connection's read path and has at most one
/// consumer.
pub struct Request<'c> {
    head: RequestHead,
    body: BodyReader,
    source: &'c mut SourceBuffer,
    remote_addr: SocketAddr,
    local_port: u16,
    scheme: &'static str,
    url_params: Params,
    form: Option<Params>,
    io_failed: bool,
}

impl<'c> Request<'c> {
    pub(crate) fn new(
        head: RequestHead,
        body: BodyReader,
        source: &'c mut SourceBuffer,
        remote_addr: SocketAddr,
        local_port: u16,
        scheme: &'static str,
    ) -> Self {
        let mut url_params = Params::new();
        if let Some(query) = &head.query {
            query::parse_encoded(query.as_bytes(), Charset::Utf8, &mut url_params);
        }

        Self {
            head,
            body,
            source,
            remote_addr,
            local_port,
            scheme,
            url_params,
            form: None,
            io_failed: false,
        }
    }

    #[inline(always)]
    pub fn method(&self) -> Method {
        self.head.method
    }

    /// The percent-decoded path component of the request target.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.head.path
    }

    /// The raw query string after `?`, undecoded, without the `?`.
    #[inline(always)]
    pub fn query_string(&self) -> Option<&str> {
        self.head.query.as_deref()
    }

    #[inline(always)]
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// The protocol literal, `HTTP/1.1` or `HTTP/1.0`.
    #[inline(always)]
    pub fn protocol(&self) -> &'static str {
        self.head.version.as_str()
    }

    /// Request headers. Chunked-body trailers are appended here once the body
    /// has been read past its final chunk.
    #[inline(always)]
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// First value of a header, case-insensitive.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name)
    }

    /// The client's address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The client's IP address.
    pub fn ip_address(&self) -> IpAddr {
        self.remote_addr.ip()
    }

    /// The local port the request arrived on.
    pub fn port(&self) -> u16 {
        self.local_port
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Host name from the `Host` header, without the port.
    pub fn host(&self) -> Option<String> {
        let host = self.header("host")?;
        let host = host.rsplit_once(':').map(|(name, _)| name).unwrap_or(host);
        Some(host.to_owned())
    }

    /// Scheme and authority, e.g. `http://localhost:4242`.
    pub fn base_url(&self) -> String {
        match self.header("host") {
            Some(host) => format!("{}://{}", self.scheme, host),
            None => format!("{}://{}:{}", self.scheme, self.remote_addr.ip(), self.local_port),
        }
    }

    /// The media type of the request body.
    ///
    /// `None` when the `Content-Type` header is absent or empty with no
    /// parameters; `Some("")` when the media type is empty but parameters
    /// (such as `charset`) are present.
    pub fn content_type(&self) -> Option<String> {
        let (media_type, _) = self.parse_content_type()?;
        Some(media_type)
    }

    /// Character encoding from the `Content-Type` `charset` parameter.
    pub fn character_encoding(&self) -> Option<Charset> {
        self.parse_content_type()?.1
    }

    /// Declared `Content-Length`, if any.
    pub fn content_length(&self) -> Option<usize> {
        crate::server::body::parse_decimal(self.header("content-length")?.as_bytes())
    }

    /// Whether the body uses chunked transfer encoding.
    pub fn is_chunked(&self) -> bool {
        self.body.is_chunked()
    }

    /// Accepted content codings, ordered by explicit q-value descending.
    ///
    /// Codings without a q-value default to `q=1.0`; ties keep arrival order.
    pub fn accept_encodings(&self) -> Vec<String> {
        self.header("accept-encoding")
            .map(parse_qualified_list)
            .unwrap_or_default()
    }

    /// Accepted locales from `Accept-Language`, ordered by q-value descending.
    pub fn locales(&self) -> Vec<String> {
        self.header("accept-language")
            .map(parse_qualified_list)
            .unwrap_or_default()
    }

    /// Decoded query string parameters in arrival order.
    pub fn url_parameters(&self) -> &Params {
        &self.url_params
    }

    /// First URL parameter value for `name`.
    pub fn url_parameter(&self, name: &str) -> Option<&str> {
        self.url_params.get(name)
    }

    /// Form fields decoded from an `application/x-www-form-urlencoded` body.
    ///
    /// Reads and consumes the body on first use. Requests with any other
    /// content type yield an empty map.
    pub async fn form_data(&mut self) -> io::Result<&Params> {
        if self.form.is_none() {
            let form = self.read_form().await?;
            self.form = Some(form);
        }
        Ok(self.form.as_ref().unwrap())
    }

    /// URL parameters merged with form data.
    ///
    /// For duplicate names, URL parameter values precede form values.
    pub async fn parameters(&mut self) -> io::Result<Params> {
        self.form_data().await?;
        let mut combined = self.url_params.clone();
        combined.extend_from(self.form.as_ref().unwrap());
        Ok(combined)
    }

    /// First combined parameter value for `name`.
    pub async fn parameter(&mut self, name: &str) -> io::Result<Option<String>> {
        if let Some(value) = self.url_params.get(name) {
            return Ok(Some(value.to_owned()));
        }
        Ok(self.form_data().await?.get(name).map(str::to_owned))
    }

    /// Reads the next run of body bytes, or `None` at end of stream.
    ///
    /// End of stream is idempotent. Trailers after a chunked body are
    /// appended to [`headers`](Self::headers).
    pub async fn read_body_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        let span = match self
            .body
            .read_span(&mut *self.source, &mut self.head.headers)
            .await
        {
            Ok(span) => span,
            Err(kind) => {
                self.io_failed = true;
                return Err(body_io_error(kind));
            }
        };
        Ok(span.map(|count| self.source.taken(count)))
    }

    /// Reads the entire remaining body.
    pub async fn read_body(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(bytes) = self.read_body_chunk().await? {
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }

    async fn read_form(&mut self) -> io::Result<Params> {
        let mut form = Params::new();
        let is_form = self
            .content_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("application/x-www-form-urlencoded"));
        if !is_form {
            return Ok(form);
        }

        let charset = self.character_encoding().unwrap_or(Charset::Utf8);
        let body = self.read_body().await?;
        query::parse_encoded(&body, charset, &mut form);
        Ok(form)
    }

    fn parse_content_type(&self) -> Option<(String, Option<Charset>)> {
        let raw = self.header("content-type")?;
        let mut parts = raw.split(';');
        let media_type = parts.next().unwrap_or("").trim();

        let mut charset = None;
        let mut has_params = false;
        for param in parts {
            has_params = true;
            let param = param.trim();
            if let Some((name, value)) = param.split_once('=') {
                if name.trim().eq_ignore_ascii_case("charset") {
                    charset = Charset::from_label(value);
                }
            }
        }

        if media_type.is_empty() && !has_params {
            return None;
        }
        Some((media_type.to_ascii_lowercase(), charset))
    }

    /// Whether a body read already failed; the connection must close.
    pub(crate) fn io_failed(&self) -> bool {
        self.io_failed
    }

    /// Discards unread body bytes so the connection can serve the next
    /// request. `Ok(false)` means too many bytes remained.
    pub(crate) async fn drain_body(&mut self, limit: usize) -> Result<bool, ErrorKind> {
        self.body
            .drain(&mut *self.source, &mut self.head.headers, limit)
            .await
    }
}

fn body_io_error(kind: ErrorKind) -> io::Error {
    match kind {
        ErrorKind::Io(err) => err.0,
        ErrorKind::ClientTimeout => {
            io::Error::new(io::ErrorKind::TimedOut, "client stalled past the idle timeout")
        }
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Parses a comma-separated list of tokens with optional `;q=` weights,
/// sorted by weight descending. The sort is stable, so equal weights keep
/// arrival order.
fn parse_qualified_list(raw: &str) -> Vec<String> {
    let mut items: Vec<(String, f32)> = Vec::new();

    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let mut pieces = part.split(';');
        let token = pieces.next().unwrap_or("").trim().to_owned();
        if token.is_empty() {
            continue;
        }

        let mut weight = 1.0f32;
        for param in pieces {
            if let Some((name, value)) = param.trim().split_once('=') {
                if name.trim().eq_ignore_ascii_case("q") {
                    weight = value.trim().parse().unwrap_or(0.0);
                }
            }
        }
        items.push((token, weight));
    }

    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    items.into_iter().map(|(token, _)| token).collect()
}
