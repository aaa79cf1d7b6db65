//! Server lifecycle observation hooks.
//!
//! An [`Instrumenter`] receives notifications for connection and request
//! lifecycle events. Implementations must be safe for concurrent calls; the
//! server invokes them from every worker. All methods default to no-ops, so
//! implementations only override what they care about.

use std::sync::atomic::{AtomicU64, Ordering};

/// Observer for server lifecycle events.
///
/// # Examples
///
/// ```
/// use hearth_web::{CountingInstrumenter, Instrumenter};
///
/// let counter = CountingInstrumenter::default();
/// counter.accepted_connection();
/// counter.wrote_response();
/// assert_eq!(counter.connections(), 1);
/// assert_eq!(counter.responses(), 1);
/// ```
pub trait Instrumenter: Send + Sync + 'static {
    /// A TCP connection was accepted by a listener.
    fn accepted_connection(&self) {}

    /// A request preamble was rejected as malformed.
    fn bad_request(&self) {}

    /// The server finished starting (all listeners bound, workers running).
    fn server_started(&self) {}

    /// A response was fully written to the wire.
    fn wrote_response(&self) {}

    /// A request arrived with `Transfer-Encoding: chunked`.
    fn chunked_request(&self) {}

    /// A response was sent with `Transfer-Encoding: chunked`.
    fn chunked_response(&self) {}
}

/// An [`Instrumenter`] that counts every event with atomic counters.
#[derive(Debug, Default)]
pub struct CountingInstrumenter {
    connections: AtomicU64,
    bad_requests: AtomicU64,
    started: AtomicU64,
    responses: AtomicU64,
    chunked_requests: AtomicU64,
    chunked_responses: AtomicU64,
}

impl CountingInstrumenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total connections accepted across all listeners.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Total malformed preambles seen.
    pub fn bad_requests(&self) -> u64 {
        self.bad_requests.load(Ordering::Relaxed)
    }

    /// Number of times the server started.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Total responses written.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Total chunked request bodies received.
    pub fn chunked_requests(&self) -> u64 {
        self.chunked_requests.load(Ordering::Relaxed)
    }

    /// Total chunked responses sent.
    pub fn chunked_responses(&self) -> u64 {
        self.chunked_responses.load(Ordering::Relaxed)
    }
}

impl Instrumenter for CountingInstrumenter {
    fn accepted_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    fn bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn server_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn wrote_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    fn chunked_request(&self) {
        self.chunked_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn chunked_response(&self) {
        self.chunked_responses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Default instrumenter: ignores every event.
#[derive(Debug, Default)]
pub(crate) struct NoopInstrumenter;

impl Instrumenter for NoopInstrumenter {}
