use hearth_web::limits::{ConnLimits, ServerLimits};
use hearth_web::{Handler, HandlerError, ListenerConfig, Request, Response, Server};

struct HelloWorld;

impl Handler for HelloWorld {
    async fn handle(
        &self,
        _: &mut Request<'_>,
        resp: &mut Response<'_>,
    ) -> Result<(), HandlerError> {
        resp.set_status(200);
        resp.set_header("Content-Type", "text/plain");
        resp.write(b"Hello, world!").await?;
        Ok(())
    }
}

// Load-test target for external generators (wrk, oha). Defaults are tuned up
// from the conservative library defaults.
#[tokio::main]
async fn main() {
    let handle = Server::builder()
        .listener(ListenerConfig::new(8080))
        .handler(HelloWorld)
        .server_limits(ServerLimits {
            worker_threads: 256,
            max_pending_connections: 10_000,
            ..ServerLimits::default()
        })
        .conn_limits(ConnLimits {
            client_timeout: std::time::Duration::from_secs(60),
            ..ConnLimits::default()
        })
        .build()
        .start()
        .await
        .unwrap();

    handle.wait().await;
}
