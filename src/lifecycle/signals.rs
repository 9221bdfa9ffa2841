//! OS signal handling.
//!
//! # Responsibilities
//! - Translate SIGINT / SIGTERM into a graceful shutdown
//! - Translate SIGHUP into a full cluster restart request
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP never shuts the process down

use crate::cluster::RestartHandle;
use crate::lifecycle::Shutdown;

/// Wait for Ctrl-C or SIGTERM, then trigger `shutdown`.
pub async fn shutdown_on_signal(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }

    shutdown.trigger();
}

/// Raise the restart flag on every SIGHUP until shutdown.
#[cfg(unix)]
pub async fn restart_on_hangup(restart: RestartHandle, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for SIGHUP");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = hangups.recv() => {
                tracing::info!("SIGHUP received");
                restart.request();
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(not(unix))]
pub async fn restart_on_hangup(_restart: RestartHandle, _shutdown: tokio::sync::broadcast::Receiver<()>) {}
