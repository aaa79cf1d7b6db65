//! Per-connection state machine.
//!
//! A worker owns an `HttpConnection` and runs one accepted stream at a time
//! through the request/response lifecycle:
//!
//! ```text
//! READING_PREAMBLE ── complete ──▶ DISPATCHING ──▶ WRITING_RESPONSE
//!        ▲   │ malformed, nothing sent: resync to CRLFCRLF      │
//!        │   ▼                                                  ▼
//!        │  READING_PREAMBLE (bad_requests += 1)         DRAINING_BODY
//!        └──────────────── keep-alive ──────────────────────────┘
//! ```
//!
//! Timeouts, I/O failures, and shutdown all lead to CLOSING; a handler
//! failure before any bytes were flushed produces a 500 with an empty body.
//! Requests on one connection are strictly sequential: pipelined preamble
//! bytes wait in the source buffer until the previous response is flushed.

use crate::buffer::BufferPool;
use crate::errors::{handler_error_response, ErrorKind, MalformedKind};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::types::{HeaderMap, Version};
use crate::instrument::Instrumenter;
use crate::limits::{ConnLimits, ReqLimits, RespLimits};
use crate::server::body::BodyReader;
use crate::server::listener::Accepted;
use crate::server::parser::{self, ParseStatus, PreambleParser};
use crate::server::server_impl::Handler;
use crate::server::stream::{split, SourceBuffer, WireWriter};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;

/// Connection FSM states, for tracing.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnState {
    ReadingPreamble,
    Dispatching,
    WritingResponse,
    DrainingBody,
    Closing,
}

/// Keep-alive negotiation per RFC 7230 §6.3.
///
/// HTTP/1.1 defaults to keep-alive unless either side says `close`; HTTP/1.0
/// requires an explicit `keep-alive` token. `close` always wins.
pub(crate) fn should_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let mut close = false;
    let mut keep_alive = false;
    for value in headers.get_all("connection") {
        for token in value.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("close") {
                close = true;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
    }

    if close {
        false
    } else if keep_alive {
        true
    } else {
        version == Version::Http11
    }
}

/// One worker's connection processor, reused across connections.
pub(crate) struct HttpConnection<H: Handler> {
    handler: Arc<H>,
    instrumenter: Arc<dyn Instrumenter>,
    parser: PreambleParser,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
    shutdown: watch::Receiver<bool>,
}

impl<H: Handler> HttpConnection<H> {
    pub(crate) fn new(
        handler: Arc<H>,
        instrumenter: Arc<dyn Instrumenter>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handler,
            instrumenter,
            parser: PreambleParser::new(req_limits.max_preamble_bytes),
            conn_limits,
            req_limits,
            resp_limits,
            shutdown,
        }
    }

    /// Runs one connection to completion and returns its buffers to the
    /// pools. Always ends with a graceful FIN so pooling clients notice the
    /// close.
    pub(crate) async fn run(
        &mut self,
        accepted: Accepted,
        read_pool: &BufferPool,
        write_pool: &BufferPool,
    ) {
        let Accepted {
            stream,
            remote_addr,
            local_port,
            scheme,
        } = accepted;
        let (mut source, mut sink) = split(
            stream,
            read_pool.acquire(),
            self.conn_limits.client_timeout,
            self.conn_limits.write_timeout,
        );
        let mut write_buf = Some(write_pool.acquire());

        let served = self
            .serve(
                &mut source,
                &mut sink,
                remote_addr,
                local_port,
                scheme,
                &mut write_buf,
            )
            .await;
        if let Err((version, kind)) = served {
            tracing::debug!(error = %kind, state = ?ConnState::Closing, "connection error");
            if let Some(wire) = kind.wire_response(version) {
                let _ = sink.write_all(wire).await;
            }
        }

        sink.shutdown().await;
        read_pool.release(source.into_buffer());
        if let Some(buf) = write_buf {
            write_pool.release(buf);
        }
    }

    async fn serve(
        &mut self,
        source: &mut SourceBuffer,
        sink: &mut WireWriter,
        remote_addr: std::net::SocketAddr,
        local_port: u16,
        scheme: &'static str,
        write_buf: &mut Option<Vec<u8>>,
    ) -> Result<(), (Version, ErrorKind)> {
        let mut version = Version::Http11;
        let mut request_count = 0usize;

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }
            source.compact();

            // READING_PREAMBLE
            let head = loop {
                match self.parser.parse(source.available()) {
                    ParseStatus::Complete { head, consumed } => {
                        source.consume(consumed);
                        break head;
                    }
                    ParseStatus::NeedMore => {
                        let mut shutdown = self.shutdown.clone();
                        let read = tokio::select! {
                            read = source.fill() => read.map_err(|kind| (version, kind))?,
                            _ = shutdown.changed() => return Err((version, ErrorKind::Shutdown)),
                        };
                        if read == 0 {
                            if source.is_empty() {
                                // Clean close between requests.
                                return Ok(());
                            }
                            return Err((
                                version,
                                ErrorKind::Io(
                                    std::io::Error::new(
                                        std::io::ErrorKind::UnexpectedEof,
                                        "connection closed mid-preamble",
                                    )
                                    .into(),
                                ),
                            ));
                        }
                    }
                    ParseStatus::Malformed(MalformedKind::PreambleTooLarge) => {
                        self.instrumenter.bad_request();
                        return Err((
                            version,
                            ErrorKind::Malformed(MalformedKind::PreambleTooLarge),
                        ));
                    }
                    ParseStatus::Malformed(kind) => {
                        // Nothing has been written for this exchange: count
                        // the bad request, skip to the next CRLFCRLF, and
                        // parse again.
                        self.instrumenter.bad_request();
                        tracing::warn!(?kind, state = ?ConnState::ReadingPreamble, "malformed preamble, resynchronizing");
                        match parser::resync(source.available()) {
                            Some(skip) => {
                                source.consume(skip);
                                source.compact();
                            }
                            None => return Err((version, ErrorKind::Malformed(kind))),
                        }
                    }
                }
            };

            // DISPATCHING
            version = head.version;
            let body = match BodyReader::from_headers(&head.headers, self.req_limits.max_body_bytes)
            {
                Ok(body) => body,
                Err(kind) => {
                    self.instrumenter.bad_request();
                    return Err((version, kind));
                }
            };
            if body.is_chunked() {
                self.instrumenter.chunked_request();
            }

            request_count += 1;
            let negotiated = should_keep_alive(head.version, &head.headers)
                && request_count < self.conn_limits.max_requests_per_connection
                && !*self.shutdown.borrow();

            tracing::debug!(
                method = head.method.as_str(),
                path = %head.path,
                state = ?ConnState::Dispatching,
            );

            let mut request = Request::new(head, body, source, remote_addr, local_port, scheme);
            let mut response = Response::new(
                sink,
                version,
                negotiated,
                write_buf.take().expect("write buffer in place"),
                self.resp_limits.write_buffer_size,
            );

            let outcome = AssertUnwindSafe(self.handler.handle(&mut request, &mut response))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error.to_string()),
                Err(panic) => Some(panic_message(&panic)),
            };

            // WRITING_RESPONSE / WRITING_ERROR
            let io_failed = request.io_failed();
            let wire_touched = response.wire_touched();
            let mut keep_alive = false;
            let mut used_chunked = false;
            let mut send_500 = false;
            let mut close = false;
            let mut error: Option<ErrorKind> = None;

            match failure {
                None if !io_failed => {
                    tracing::trace!(state = ?ConnState::WritingResponse);
                    match response.finish().await {
                        Ok(()) => {
                            keep_alive = response.keep_alive();
                            used_chunked = response.used_chunked();
                        }
                        Err(kind) => {
                            close = true;
                            error = Some(kind);
                        }
                    }
                }
                None => close = true,
                Some(reason) => {
                    tracing::warn!(%reason, "handler failed");
                    if io_failed || wire_touched {
                        close = true;
                    } else {
                        send_500 = true;
                    }
                }
            }

            *write_buf = Some(response.into_buffer());

            if send_500 {
                let _ = sink.write_all(handler_error_response(version)).await;
                self.instrumenter.wrote_response();
                return Ok(());
            }
            if close {
                return match error {
                    Some(kind) => Err((version, kind)),
                    None => Ok(()),
                };
            }

            self.instrumenter.wrote_response();
            if used_chunked {
                self.instrumenter.chunked_response();
            }

            // DRAINING_BODY
            tracing::trace!(state = ?ConnState::DrainingBody);
            let drained = request
                .drain_body(self.conn_limits.max_drain_bytes)
                .await
                .map_err(|kind| (version, kind))?;
            drop(request);

            if !drained {
                tracing::debug!("unread request body over the drain limit");
                return Ok(());
            }
            if !keep_alive {
                return Ok(());
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod keep_alive_tests {
    use super::*;

    fn headers(values: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for value in values {
            map.add("Connection", *value);
        }
        map
    }

    #[test]
    fn negotiation() {
        #[rustfmt::skip]
        let cases: [(Version, &[&str], bool); 9] = [
            (Version::Http11, &[],                      true),
            (Version::Http11, &["keep-alive"],          true),
            (Version::Http11, &["close"],               false),
            (Version::Http11, &["CLOSE"],               false),
            (Version::Http11, &["keep-alive, close"],   false),
            (Version::Http10, &[],                      false),
            (Version::Http10, &["keep-alive"],          true),
            (Version::Http10, &["Keep-Alive"],          true),
            (Version::Http10, &["close"],               false),
        ];

        for (version, values, expected) in cases {
            assert_eq!(
                should_keep_alive(version, &headers(values)),
                expected,
                "{version:?} {values:?}"
            );
        }
    }
}
