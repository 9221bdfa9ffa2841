//! Shared utilities for integration and load testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::config::ServerConfig;
use dispatch_core::dispatch::Dispatcher;
use dispatch_core::http::{HttpServer, ServerError};
use dispatch_core::lifecycle::Shutdown;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server listening on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server should stop")
            .expect("server task panicked")
            .expect("server failed");
    }
}

/// Start `dispatcher` behind the full HTTP stack built from `config`.
pub async fn start_server(config: ServerConfig, dispatcher: Dispatcher) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dispatcher = Arc::new(dispatcher);
    let server = HttpServer::new(config, Arc::clone(&dispatcher));
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();

    let task = tokio::spawn(async move { server.serve(listener, rx).await });

    TestServer {
        addr,
        dispatcher,
        shutdown,
        task,
    }
}

/// A client that does not pool connections, so every request is independent.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
