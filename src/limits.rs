//! Server configuration limits and timeouts
//!
//! Everything the server bounds is configured here, split by scope:
//! [`ServerLimits`] for the worker pool, admission queue, and shutdown;
//! [`ConnLimits`] for per-connection timeouts and body draining;
//! [`ReqLimits`] for preamble and body sizes; [`RespLimits`] for response
//! buffering. The defaults are sized for modest deployments and lean toward
//! cutting off misbehaving clients early rather than holding resources for
//! them — raise a limit deliberately when a workload actually needs it.
//!
//! # Examples
//!
//! ```no_run
//! use hearth_web::{Server, ListenerConfig};
//! use hearth_web::limits::{ConnLimits, ReqLimits, ServerLimits};
//! use std::time::Duration;
//! # use hearth_web::{Handler, HandlerError, Request, Response};
//! # struct MyHandler;
//! # impl Handler for MyHandler {
//! #     async fn handle(&self, _: &mut Request<'_>, resp: &mut Response<'_>) -> Result<(), HandlerError> {
//! #         resp.set_status(200);
//! #         Ok(())
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .listener(ListenerConfig::new(8080))
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             worker_threads: 32,
//!             ..ServerLimits::default()
//!         })
//!         .conn_limits(ConnLimits {
//!             client_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .req_limits(ReqLimits {
//!             max_preamble_bytes: 256 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build();
//!
//!     let handle = server.start().await.unwrap();
//!     handle.wait().await;
//! }
//! ```

use std::time::Duration;

/// Worker pool sizing, admission queueing, and shutdown pacing.
///
/// Accepted connections land in an admission queue first. A fixed set of
/// worker tasks, created once at startup, pull connections off the queue and
/// own them until they close. When the queue is full, new connections get an
/// immediate HTTP 503 instead of waiting.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks owning connections (default: number of CPUs,
    /// minimum 1).
    ///
    /// Exactly `worker_threads` workers exist for the lifetime of the
    /// server; each serves one connection at a time, end to end. This is
    /// also the number of simultaneously active connections.
    pub worker_threads: usize,

    /// Maximum number of accepted connections waiting in the admission queue
    /// (default: `250`).
    ///
    /// Connections beyond this limit are answered with `503 Service
    /// Unavailable` and closed.
    pub max_pending_connections: usize,

    /// How an idle worker waits for the next connection (default:
    /// `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Grace period for in-flight responses during shutdown (default: `5 s`).
    ///
    /// On shutdown the server stops accepting, closes idle keep-alive
    /// connections immediately, and gives active requests this long to finish
    /// before force-closing.
    pub shutdown_grace: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            shutdown_grace: Duration::from_secs(5),

            _priv: (),
        }
    }
}

/// How an idle worker polls the admission queue.
///
/// The trade is hand-off latency against idle CPU: yielding re-polls as fast
/// as the scheduler allows, sleeping caps the poll rate.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]
    ///
    /// # Note
    /// Busy-spins between connections. Picks up work fastest but burns a
    /// core per idle worker; only worth it when every microsecond of
    /// hand-off latency matters.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    Sleep(Duration),
}

/// Per-connection timeouts and lifecycle bounds.
///
/// These govern how long one client can occupy a worker. Reads and writes
/// each carry their own deadline, and a handler that ignores its request
/// body only gets a bounded amount of it discarded on its behalf.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum idle time between reads from the client (default: `20 seconds`)
    ///
    /// A client that goes quiet while the server wants bytes — mid-preamble,
    /// mid-body, or between keep-alive requests — is disconnected without a
    /// response once this elapses. Slow-drip clients cannot pin a worker
    /// longer than this per read.
    pub client_timeout: Duration,

    /// Maximum duration for a single socket write (default: `10 seconds`)
    ///
    /// Covers clients that stop reading: when a write cannot make progress
    /// within this window, the connection is dropped mid-response.
    pub write_timeout: Duration,

    /// Maximum number of unread body bytes drained between keep-alive
    /// requests (default: `64 KiB`)
    ///
    /// When a handler ignores part of a request body, the server discards the
    /// remainder before parsing the next request. If more than this many
    /// bytes are left, the connection closes instead.
    pub max_drain_bytes: usize,

    /// Maximum number of requests served per connection
    /// (default: unlimited)
    ///
    /// The connection closes after this many requests, announced through the
    /// `Connection: close` echo on the final response.
    pub max_requests_per_connection: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(10),
            max_drain_bytes: 64 * 1024,
            max_requests_per_connection: usize::MAX,

            _priv: (),
        }
    }
}

/// Request parsing limits and read-buffer sizing
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Initial capacity of the pooled per-connection read buffer
    /// (default: `16 KiB`)
    ///
    /// The buffer grows as needed (up to `max_preamble_bytes` while reading a
    /// preamble) and is shrunk back when returned to the pool.
    pub read_buffer_size: usize,

    /// Maximum total size of a request preamble, request line and headers
    /// included (default: `128 KiB`)
    ///
    /// Preambles exceeding this limit are rejected with
    /// `431 Request Header Fields Too Large` and the connection closes.
    pub max_preamble_bytes: usize,

    /// Maximum request body size in bytes (default: unlimited)
    ///
    /// Declared or chunk-accumulated bodies beyond this limit are rejected
    /// with `413 Payload Too Large` and the connection closes.
    pub max_body_bytes: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            read_buffer_size: 16 * 1024,
            max_preamble_bytes: 128 * 1024,
            max_body_bytes: usize::MAX,

            _priv: (),
        }
    }
}

/// Response buffering limits
///
/// # Buffer Management
///
/// Response bodies are buffered up to `write_buffer_size` before the framing
/// decision is forced: a body that fits entirely gets an automatic
/// `Content-Length`, a larger or explicitly flushed body switches to chunked
/// transfer encoding. Buffers that grew past `max_buffer_capacity` are
/// reallocated at `write_buffer_size` when returned to the pool.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Body bytes buffered before the preamble is flushed (default: `16 KiB`)
    pub write_buffer_size: usize,

    /// Maximum retained buffer capacity between requests (default: `64 KiB`)
    pub max_buffer_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            write_buffer_size: 16 * 1024,
            max_buffer_capacity: 64 * 1024,

            _priv: (),
        }
    }
}
