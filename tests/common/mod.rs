//! Raw-socket test harness: starts servers on ephemeral ports and speaks
//! HTTP/1.1 over plain TCP so the bytes on the wire stay visible to the
//! tests.
#![allow(dead_code)]

use hearth_web::limits::{ConnLimits, ServerLimits};
use hearth_web::{CountingInstrumenter, Handler, ListenerConfig, Server, ServerHandle};
use std::sync::Arc;
use std::sync::Once;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub fn init_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Starts a single-listener server on an ephemeral port.
pub async fn start<H: Handler>(handler: H) -> ServerHandle {
    start_with(handler, None, None).await
}

/// Starts a server with an optional instrumenter and connection limits.
pub async fn start_with<H: Handler>(
    handler: H,
    instrumenter: Option<Arc<CountingInstrumenter>>,
    conn_limits: Option<ConnLimits>,
) -> ServerHandle {
    init_logs();
    let mut builder = Server::builder()
        .handler(handler)
        .listener(ListenerConfig::with_addr("127.0.0.1:0".parse().unwrap()))
        .server_limits(ServerLimits {
            worker_threads: 4,
            ..ServerLimits::default()
        });
    if let Some(instrumenter) = instrumenter {
        builder = builder.instrumenter(instrumenter);
    }
    if let Some(limits) = conn_limits {
        builder = builder.conn_limits(limits);
    }
    builder.build().start().await.unwrap()
}

/// Starts a server bound to a specific localhost port.
pub async fn start_on<H: Handler>(handler: H, port: u16) -> ServerHandle {
    init_logs();
    Server::builder()
        .handler(handler)
        .listener(ListenerConfig::with_addr(
            format!("127.0.0.1:{port}").parse().unwrap(),
        ))
        .server_limits(ServerLimits {
            worker_threads: 4,
            ..ServerLimits::default()
        })
        .build()
        .start()
        .await
        .unwrap()
}

/// A response as read off the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Opens a connection, sends `request` verbatim, reads one response, closes.
pub async fn send(port: u16, request: &[u8]) -> RawResponse {
    let mut stream = connect(port).await;
    stream.write_all(request).await.unwrap();
    read_response(&mut stream).await.unwrap()
}

pub async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

/// Formats a simple request preamble with optional body.
pub fn request_bytes(
    method: &str,
    target: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Vec<u8> {
    let mut out = format!("{method} {target} HTTP/1.1\r\nHost: 127.0.0.1\r\n");
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Reads exactly one response, honoring Content-Length or chunked framing.
pub async fn read_response(stream: &mut TcpStream) -> std::io::Result<RawResponse> {
    let mut buf = Vec::new();

    // Preamble.
    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 4096];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed before a full response: {:?}", String::from_utf8_lossy(&buf)),
            ));
        }
        buf.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("bad status line: {status_line:?}"));
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_owned(), value.trim().to_owned()))
        })
        .collect();

    let mut rest = buf.split_off(header_end + 4);
    let response_headers = RawResponse {
        status,
        headers,
        body: Vec::new(),
    };

    let body = if let Some(length) = response_headers
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        while rest.len() < length {
            let mut chunk = [0u8; 4096];
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "body truncated",
                ));
            }
            rest.extend_from_slice(&chunk[..read]);
        }
        rest.truncate(length);
        rest
    } else if response_headers
        .header("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        decode_chunked(stream, rest).await?
    } else {
        // Read until the server closes.
        loop {
            let mut chunk = [0u8; 4096];
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                break rest;
            }
            rest.extend_from_slice(&chunk[..read]);
        }
    };

    Ok(RawResponse {
        body,
        ..response_headers
    })
}

async fn decode_chunked(stream: &mut TcpStream, mut buf: Vec<u8>) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();

    loop {
        // Chunk-size line.
        let line_end = loop {
            if let Some(pos) = find(&buf, b"\r\n") {
                break pos;
            }
            read_more(stream, &mut buf).await?;
        };
        let size = usize::from_str_radix(
            String::from_utf8_lossy(&buf[..line_end]).trim(),
            16,
        )
        .expect("chunk size");
        buf.drain(..line_end + 2);

        if size == 0 {
            // Trailer section ends with a blank line.
            while find(&buf, b"\r\n").is_none() {
                read_more(stream, &mut buf).await?;
            }
            return Ok(body);
        }

        while buf.len() < size + 2 {
            read_more(stream, &mut buf).await?;
        }
        body.extend_from_slice(&buf[..size]);
        buf.drain(..size + 2);
    }
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<()> {
    let mut chunk = [0u8; 4096];
    let read = stream.read(&mut chunk).await?;
    if read == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "chunked body truncated",
        ));
    }
    buf.extend_from_slice(&chunk[..read]);
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A deliberately naive keep-alive pooling client.
///
/// Mimics connection pools that only notice a server-side close through the
/// FIN: before reusing a pooled socket it peeks for EOF and reconnects when
/// the server hung up.
pub struct PooledClient {
    port: u16,
    socket: Option<TcpStream>,
}

impl PooledClient {
    pub fn new(port: u16) -> Self {
        Self { port, socket: None }
    }

    pub async fn get(&mut self, target: &str) -> RawResponse {
        let mut socket = match self.socket.take() {
            Some(socket) if !saw_fin(&socket) => socket,
            _ => connect(self.port).await,
        };

        let request = request_bytes("GET", target, &[], b"");
        socket.write_all(&request).await.unwrap();
        let response = read_response(&mut socket).await.unwrap();
        self.socket = Some(socket);
        response
    }
}

fn saw_fin(socket: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match socket.try_read(&mut probe) {
        Ok(0) => true,
        Ok(_) => true, // unexpected bytes on an idle socket: evict
        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    }
}
