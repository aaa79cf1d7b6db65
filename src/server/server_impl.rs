//! Server assembly: the handler contract, the builder, the worker pool, and
//! graceful shutdown.

use crate::buffer::BufferPool;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::instrument::{Instrumenter, NoopInstrumenter};
use crate::limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy};
use crate::server::connection::HttpConnection;
use crate::server::listener::{accept_loop, Accepted, ListenerConfig};
use crossbeam::queue::SegQueue;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{yield_now, JoinHandle};
use tokio::time::sleep;

/// Error escaping a handler. Translated to a `500` with an empty body when
/// nothing has been flushed, and to connection termination otherwise.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A request handler.
///
/// Handlers are called concurrently from every worker; shared state must be
/// thread-safe. A single request/response pair is only ever touched by one
/// worker, and neither may be retained past the call.
///
/// # Examples
///
/// ```
/// use hearth_web::{Handler, HandlerError, Request, Response};
///
/// struct Hello;
///
/// impl Handler for Hello {
///     async fn handle(&self, _: &mut Request<'_>, resp: &mut Response<'_>) -> Result<(), HandlerError> {
///         resp.set_status(200);
///         resp.set_header("Content-Type", "text/plain");
///         resp.write(b"Hello world!").await?;
///         Ok(())
///     }
/// }
/// ```
pub trait Handler: Sync + Send + 'static {
    /// Processes one request.
    ///
    /// Returning `Ok(())` marks the response ready to flush; the server
    /// finalizes the framing. An `Err` (or a panic) yields a `500` if nothing
    /// has reached the wire yet, otherwise the connection is terminated.
    fn handle(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// An embeddable HTTP/1.1 server.
///
/// Configured through [`Server::builder`], started with [`Server::start`].
///
/// # Examples
///
/// ```no_run
/// use hearth_web::{ListenerConfig, Server};
/// # use hearth_web::{Handler, HandlerError, Request, Response};
/// # struct MyHandler;
/// # impl Handler for MyHandler {
/// #     async fn handle(&self, _: &mut Request<'_>, resp: &mut Response<'_>) -> Result<(), HandlerError> {
/// #         resp.set_status(200);
/// #         Ok(())
/// #     }
/// # }
///
/// #[tokio::main]
/// async fn main() {
///     let handle = Server::builder()
///         .listener(ListenerConfig::new(8080))
///         .handler(MyHandler)
///         .build()
///         .start()
///         .await
///         .unwrap();
///
///     handle.wait().await;
/// }
/// ```
pub struct Server<H: Handler> {
    handler: Arc<H>,
    listeners: Vec<ListenerConfig>,
    instrumenter: Arc<dyn Instrumenter>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl<H: Handler> Server<H> {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder<H> {
        ServerBuilder {
            handler: None,
            listeners: Vec::new(),
            instrumenter: None,
            server_limits: None,
            conn_limits: None,
            req_limits: None,
            resp_limits: None,
        }
    }

    /// Binds every listener, spawns the worker pool, and starts serving.
    ///
    /// # Errors
    ///
    /// Returns the bind error if any listener address cannot be bound.
    pub async fn start(self) -> io::Result<ServerHandle> {
        let workers = self.server_limits.worker_threads.max(1);
        let queue: Arc<SegQueue<Accepted>> = Arc::new(SegQueue::new());
        let read_pool = Arc::new(BufferPool::for_reads(workers, &self.req_limits));
        let write_pool = Arc::new(BufferPool::for_writes(workers, &self.resp_limits));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut accept_tasks = Vec::with_capacity(self.listeners.len());
        let mut local_addrs = Vec::with_capacity(self.listeners.len());
        for config in self.listeners {
            let listener = TcpListener::bind(config.addr).await?;
            local_addrs.push(listener.local_addr()?);
            accept_tasks.push(tokio::spawn(accept_loop(
                listener,
                config.tls,
                queue.clone(),
                self.server_limits.max_pending_connections,
                self.instrumenter.clone(),
                shutdown_rx.clone(),
            )));
        }

        let mut worker_tasks = Vec::with_capacity(workers);
        for _ in 0..workers {
            let mut connection = HttpConnection::new(
                self.handler.clone(),
                self.instrumenter.clone(),
                self.conn_limits.clone(),
                self.req_limits.clone(),
                self.resp_limits.clone(),
                shutdown_rx.clone(),
            );
            let queue = queue.clone();
            let read_pool = read_pool.clone();
            let write_pool = write_pool.clone();
            let shutdown = shutdown_rx.clone();
            let wait = self.server_limits.wait_strategy.clone();

            worker_tasks.push(tokio::spawn(async move {
                while let Some(accepted) = next_connection(&queue, &wait, &shutdown).await {
                    connection.run(accepted, &read_pool, &write_pool).await;
                }
            }));
        }

        self.instrumenter.server_started();
        tracing::info!(addrs = ?local_addrs, workers, "server started");

        Ok(ServerHandle {
            shutdown: shutdown_tx,
            accept_tasks,
            worker_tasks,
            local_addrs,
            grace: self.server_limits.shutdown_grace,
        })
    }
}

/// Pulls the next accepted connection, or `None` once shutdown is signaled
/// and the queue stays empty.
async fn next_connection(
    queue: &SegQueue<Accepted>,
    wait: &WaitStrategy,
    shutdown: &watch::Receiver<bool>,
) -> Option<Accepted> {
    loop {
        if let Some(accepted) = queue.pop() {
            return Some(accepted);
        }
        if *shutdown.borrow() {
            return None;
        }

        match wait {
            WaitStrategy::Yield => yield_now().await,
            WaitStrategy::Sleep(duration) => sleep(*duration).await,
        }
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    accept_tasks: Vec<JoinHandle<()>>,
    worker_tasks: Vec<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
    grace: std::time::Duration,
}

impl ServerHandle {
    /// Bound addresses, one per configured listener, in configuration order.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Port of the first listener.
    pub fn port(&self) -> u16 {
        self.local_addrs[0].port()
    }

    /// Runs until the server is shut down from elsewhere.
    pub async fn wait(self) {
        for task in self.accept_tasks {
            let _ = task.await;
        }
        for task in self.worker_tasks {
            let _ = task.await;
        }
    }

    /// Stops the server: no new connections, idle keep-alive sockets get an
    /// immediate FIN, and in-flight responses are given the configured grace
    /// period before workers are aborted.
    pub async fn shutdown(self) {
        tracing::info!("server shutting down");
        let _ = self.shutdown.send(true);

        for task in self.accept_tasks {
            let _ = task.await;
        }

        let mut workers = self.worker_tasks;
        let drained = tokio::time::timeout(
            self.grace,
            futures::future::join_all(workers.iter_mut()),
        )
        .await;
        if drained.is_err() {
            tracing::warn!("shutdown grace elapsed, aborting remaining workers");
            for task in &workers {
                task.abort();
            }
        }
    }
}

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H: Handler> {
    handler: Option<Arc<H>>,
    listeners: Vec<ListenerConfig>,
    instrumenter: Option<Arc<dyn Instrumenter>>,
    server_limits: Option<ServerLimits>,
    conn_limits: Option<ConnLimits>,
    req_limits: Option<ReqLimits>,
    resp_limits: Option<RespLimits>,
}

impl<H: Handler> ServerBuilder<H> {
    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Adds a listener. May be called multiple times to serve several ports,
    /// plain and TLS mixed freely.
    ///
    /// **At least one listener is required.**
    #[inline(always)]
    pub fn listener(mut self, config: ListenerConfig) -> Self {
        self.listeners.push(config);
        self
    }

    /// Installs an [`Instrumenter`] observing server lifecycle events.
    #[inline(always)]
    pub fn instrumenter(mut self, instrumenter: Arc<dyn Instrumenter>) -> Self {
        self.instrumenter = Some(instrumenter);
        self
    }

    /// Configures server-level concurrency and shutdown limits.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection timeouts and per-connection limits.
    #[inline(always)]
    pub fn conn_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn req_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = Some(limits);
        self
    }

    /// Configures response buffering limits.
    #[inline(always)]
    pub fn resp_limits(mut self, limits: RespLimits) -> Self {
        self.resp_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics when:
    /// - The `handler` method was not called.
    /// - No listener was configured.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H> {
        assert!(
            !self.listeners.is_empty(),
            "at least one `listener` must be configured"
        );

        Server {
            handler: self
                .handler
                .expect("The `handler` method must be called to create"),
            listeners: self.listeners,
            instrumenter: self
                .instrumenter
                .unwrap_or_else(|| Arc::new(NoopInstrumenter)),
            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.conn_limits.unwrap_or_default(),
            req_limits: self.req_limits.unwrap_or_default(),
            resp_limits: self.resp_limits.unwrap_or_default(),
        }
    }
}
