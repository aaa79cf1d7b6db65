//! hearth_web - Embeddable HTTP/1.1 server with strict wire-level framing
//!
//! A correctness-first HTTP/1.1 server core: incremental preamble parsing,
//! content-length and chunked body framing in both directions, keep-alive
//! connection lifecycles, client timeouts, and graceful shutdown, over plain
//! TCP and TLS.
//!
//! # Features
//!
//! - **Strict HTTP/1.1 wire handling** - RFC 7230 preamble grammar, chunked
//!   transfer decoding with trailers, automatic response framing.
//! - **Keep-alive done right** - pipelined preambles are served strictly
//!   sequentially; a malformed preamble is counted, skipped, and the
//!   connection keeps serving.
//! - **Bounded everything** - preamble size, body drain, admission queue,
//!   read/write timeouts; buffers come from a capped pool.
//! - **Plain and TLS listeners side by side** - TLS terminates through a
//!   caller-supplied `tokio_rustls::TlsAcceptor`.
//! - **Observable** - implement [`Instrumenter`] to count connections, bad
//!   requests, and responses.
//!
//! # Quick Start
//!
//! ```no_run
//! use hearth_web::{Handler, HandlerError, ListenerConfig, Request, Response, Server};
//!
//! struct HelloWorld;
//!
//! impl Handler for HelloWorld {
//!     async fn handle(&self, _: &mut Request<'_>, resp: &mut Response<'_>) -> Result<(), HandlerError> {
//!         resp.set_status(200);
//!         resp.set_header("Content-Type", "text/plain");
//!         resp.write(b"Hello world!").await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = Server::builder()
//!         .listener(ListenerConfig::new(8080))
//!         .handler(HelloWorld)
//!         .build()
//!         .start()
//!         .await
//!         .unwrap();
//!
//!     handle.wait().await;
//! }
//! ```
//!
//! Handlers read the request body lazily ([`Request::read_body`],
//! [`Request::form_data`]) and stream responses through [`Response::write`];
//! a response flushed before completion switches to chunked transfer
//! encoding automatically. See [`limits`] for the configurable timeouts and
//! size bounds.

pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod body;
    pub(crate) mod connection;
    pub(crate) mod listener;
    pub(crate) mod parser;
    pub(crate) mod server_impl;
    pub(crate) mod stream;
}
pub(crate) mod buffer;
pub(crate) mod errors;
pub(crate) mod instrument;
pub mod limits;

pub use crate::{
    errors::MalformedKind,
    http::{
        query::Params,
        request::{Request, RequestHead},
        response::Response,
        types::{Charset, HeaderMap, Method, Version},
    },
    instrument::{CountingInstrumenter, Instrumenter},
    server::{
        listener::ListenerConfig,
        parser::{ParseStatus, PreambleParser},
        server_impl::{Handler, HandlerError, Server, ServerBuilder, ServerHandle},
    },
};

pub use crate::http::query;

/// Re-exported so TLS listeners can be configured without naming the
/// underlying crate's version.
pub use tokio_rustls::TlsAcceptor;
