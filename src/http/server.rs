//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router whose fallback hands every request to the
//!   dispatcher
//! - Wire up middleware (request ID, tracing, body limit, response headers)
//! - Serve every configured port, over TLS when material is configured
//! - Stop accepting and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::net::{self, ListenerError, TlsError};
use crate::security::headers::apply_response_headers;

/// Time TLS connections get to finish after shutdown is signalled.
const TLS_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Error type for the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// HTTP front end of one worker.
pub struct HttpServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        let router = Router::new()
            .fallback(dispatch_handler)
            .with_state(Arc::clone(&self.dispatcher))
            .layer(RequestBodyLimitLayer::new(self.config.server.max_body_size))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

        apply_response_headers(router, self.dispatcher.settings().worker_id)
    }

    /// Bind every configured port and serve until shutdown.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let listeners = net::bind_ports(&self.config.server.bind_host, &self.config.server.ports)?;

        let tls = match self.config.tls.material() {
            Some((key, cert)) => Some(net::load_tls_config(key, cert).await?),
            None => {
                tracing::warn!("TLS not configured, serving plain HTTP");
                None
            }
        };

        let router = self.router();
        let mut tasks = JoinSet::new();

        for listener in listeners {
            let router = router.clone();
            let shutdown = shutdown.resubscribe();
            match &tls {
                Some(tls) => {
                    tasks.spawn(serve_tls(listener, router, tls.clone(), shutdown));
                }
                None => {
                    tasks.spawn(serve_plain(listener, router, shutdown));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined.map_err(ServerError::from).and_then(|result| result) {
                tracing::error!(error = %e, "Listener failed, stopping remaining listeners");
                tasks.abort_all();
                return Err(e);
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve an already bound listener over plain HTTP until shutdown.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        serve_plain(listener, self.router(), shutdown).await
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, tls = false, "HTTP server starting");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
        tracing::debug!(address = %addr, "Listener draining");
    })
    .await?;

    Ok(())
}

async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: RustlsConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, tls = true, "HTTP server starting");

    let handle = axum_server::Handle::new();
    let signal = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        tracing::debug!(address = %addr, "Listener draining");
        signal.graceful_shutdown(Some(TLS_GRACE_PERIOD));
    });

    axum_server::from_tcp_rustls(listener.into_std()?, tls)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    Ok(())
}

/// Fallback handler: every request goes through the dispatcher.
async fn dispatch_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request<Body>,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    dispatcher.dispatch(request, remote_addr).await
}
