//! Startup orchestration.
//!
//! # Responsibilities
//! - Build a worker: dispatcher, background tasks, listeners
//! - Build the supervisor: worker command, restart sources
//! - Tie both to signal-driven shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Routes are registered before listeners start (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::cluster::{ClusterError, ClusterSupervisor, WorkerCommand};
use crate::config::watcher::ConfigWatcher;
use crate::config::{ConfigError, ConfigSource, ObservabilityConfig, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::routing::RoutingError;

/// Error type for startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to register routes: {0}")]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Failed to watch configuration file: {0}")]
    Watch(#[from] notify::Error),

    #[error("Failed to locate worker executable: {0}")]
    Io(#[from] std::io::Error),
}

/// Run one worker until Ctrl-C / SIGTERM.
///
/// `register` mounts the application's routes and context providers on
/// the dispatcher before any listener is bound.
pub async fn run_worker<F>(
    config: ServerConfig,
    source: Arc<dyn ConfigSource>,
    worker_id: Option<usize>,
    register: F,
) -> Result<(), StartupError>
where
    F: FnOnce(&Dispatcher) -> Result<(), RoutingError>,
{
    init_metrics(&config.observability, worker_id);

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let dispatcher = Arc::new(Dispatcher::from_config(&config, worker_id));
    register(&dispatcher)?;

    tracing::info!(
        worker = ?worker_id,
        routes = dispatcher.routes().len(),
        providers = dispatcher.providers().len(),
        restrictions = dispatcher.restrictors().len(),
        ports = ?config.server.ports,
        "Worker starting"
    );

    if dispatcher.rate_limiter().is_enabled() {
        tokio::spawn(Arc::clone(dispatcher.rate_limiter()).run_decay(shutdown.subscribe()));
    }
    tokio::spawn(Arc::clone(dispatcher.restrictors()).run_refresh(
        source,
        config.restrictions.refresh_interval(),
        shutdown.subscribe(),
    ));

    let drain_limit = config.server.maximum_request_time();
    let server = HttpServer::new(config, Arc::clone(&dispatcher));
    server.run(shutdown.subscribe()).await?;

    if !dispatcher.tracker().wait_idle(drain_limit).await {
        tracing::warn!(
            in_flight = dispatcher.tracker().active_count(),
            "Requests still in flight at shutdown"
        );
    }

    tracing::info!(
        worker = ?worker_id,
        served = dispatcher.tracker().total_count(),
        "Shutdown complete"
    );
    Ok(())
}

/// Run the supervisor until Ctrl-C / SIGTERM.
///
/// Workers are this binary re-executed as `serve` against `config_path`.
/// Edits to that file restart every worker with the edited cluster
/// settings; SIGHUP restarts them with the current ones.
pub async fn run_cluster(config: ServerConfig, config_path: &Path) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let command = WorkerCommand::current_exe(config_path)?;
    let supervisor = ClusterSupervisor::new(config.cluster.clone(), command);
    let restart = supervisor.restart_handle();

    tokio::spawn(signals::restart_on_hangup(restart.clone(), shutdown.subscribe()));

    // Kept alive for the lifetime of the supervisor.
    let _watcher = if config_path.exists() {
        let (watcher, mut updates) = ConfigWatcher::new(config_path);
        let watcher = watcher.run()?;

        let restart = restart.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(config) = updates.recv() => restart.reconfigure(config.cluster),
                    _ = stop.recv() => break,
                }
            }
        });
        Some(watcher)
    } else {
        tracing::warn!(path = %config_path.display(), "Config file not found, reload on change disabled");
        None
    };

    supervisor.run(shutdown.subscribe()).await?;
    Ok(())
}

/// Install the Prometheus exporter. Workers offset the port by their id
/// so that every process in a cluster can be scraped.
fn init_metrics(config: &ObservabilityConfig, worker_id: Option<usize>) {
    if !config.metrics_enabled {
        return;
    }

    match config.metrics_address.parse::<SocketAddr>() {
        Ok(mut addr) => {
            if let Some(id) = worker_id {
                addr.set_port(addr.port().saturating_add(id as u16));
            }
            metrics::init_metrics(addr);
        }
        Err(e) => tracing::error!(
            metrics_address = %config.metrics_address,
            error = %e,
            "Failed to parse metrics address"
        ),
    }
}
