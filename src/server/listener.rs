//! Listener configuration and accept loops.
//!
//! Each configured port gets its own accept loop. Accepted sockets are
//! wrapped in TLS where configured (the caller supplies a prepared
//! [`TlsAcceptor`]; key material loading stays outside the core) and pushed
//! onto the shared admission queue for the worker pool. When the queue is
//! full, connections are answered with an immediate `503` and closed.

use crate::errors::ErrorKind;
use crate::http::types::Version;
use crate::instrument::Instrumenter;
use crate::server::stream::BoxedStream;
use crossbeam::queue::SegQueue;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

/// One port to serve, optionally with TLS.
///
/// # Examples
///
/// ```no_run
/// use hearth_web::ListenerConfig;
///
/// // Plain HTTP on every interface.
/// let http = ListenerConfig::new(8080);
///
/// // Bind a specific address.
/// let local = ListenerConfig::with_addr("127.0.0.1:8081".parse().unwrap());
/// ```
///
/// TLS listeners take a prepared `tokio_rustls::TlsAcceptor`; certificate and
/// key loading happen outside the server:
///
/// ```no_run
/// # use hearth_web::ListenerConfig;
/// # fn acceptor() -> tokio_rustls::TlsAcceptor { unimplemented!() }
/// let https = ListenerConfig::new(8443).tls(acceptor());
/// ```
#[derive(Clone)]
pub struct ListenerConfig {
    pub(crate) addr: SocketAddr,
    pub(crate) tls: Option<TlsAcceptor>,
}

impl ListenerConfig {
    /// Listens on `0.0.0.0:port`.
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            tls: None,
        }
    }

    /// Listens on a specific address.
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self { addr, tls: None }
    }

    /// Terminates TLS on this port with the given acceptor.
    pub fn tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }
}

impl std::fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("addr", &self.addr)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// An accepted connection, queued for a worker.
pub(crate) struct Accepted {
    pub(crate) stream: BoxedStream,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) local_port: u16,
    pub(crate) scheme: &'static str,
}

/// Accepts connections on one listener until shutdown.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    queue: Arc<SegQueue<Accepted>>,
    max_pending: usize,
    instrumenter: Arc<dyn Instrumenter>,
    mut shutdown: watch::Receiver<bool>,
) {
    let local_port = listener.local_addr().map(|addr| addr.port()).unwrap_or(0);
    let scheme = if tls.is_some() { "https" } else { "http" };

    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::debug!(%error, local_port, "accept failed");
                    continue;
                }
            },
            _ = shutdown.changed() => {
                tracing::debug!(local_port, "listener stopped");
                return;
            }
        };

        let _ = stream.set_nodelay(true);
        instrumenter.accepted_connection();

        if queue.len() >= max_pending {
            tracing::warn!(local_port, "admission queue full, answering 503");
            tokio::spawn(async move {
                let mut stream = stream;
                let wire = ErrorKind::ServiceUnavailable
                    .wire_response(Version::Http11)
                    .expect("503 has a wire form");
                let _ = stream.write_all(wire).await;
                let _ = stream.shutdown().await;
            });
            continue;
        }

        match &tls {
            None => queue.push(Accepted {
                stream: Box::new(stream),
                remote_addr,
                local_port,
                scheme,
            }),
            Some(acceptor) => {
                // Handshakes run off the accept loop so a slow client cannot
                // stall other connections. A failed handshake closes the
                // socket with no HTTP response.
                let acceptor = acceptor.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => queue.push(Accepted {
                            stream: Box::new(tls_stream),
                            remote_addr,
                            local_port,
                            scheme,
                        }),
                        Err(error) => {
                            tracing::debug!(%error, %remote_addr, "TLS handshake failed");
                        }
                    }
                });
            }
        }
    }
}
