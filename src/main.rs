//! dispatch-core server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────── cluster ────────────────────────┐
//!                  │  supervisor ── spawns / respawns / restarts ──┐         │
//!                  │                                               ▼         │
//!  Client ─────────┼─▶ net listener ─▶ http server ─▶ dispatcher ─▶ routes   │
//!  Request         │   (per port,      (request id,   (rate limit,  (priority│
//!                  │    SO_REUSEPORT)   trace, CORS)   restrictor,   order)  │
//!                  │                                   providers)            │
//!  Client ◀────────┼──────────────── reply serialization ◀──────────┘         │
//!  Response        │                                                         │
//!                  │  config (TOML, watcher) · observability · lifecycle     │
//!                  └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `serve` runs a single worker, `cluster` runs the supervisor, which
//! re-executes this binary as `serve` once per worker slot.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use dispatch_core::config::{load_config, ConfigSource, FileSource, ServerConfig};
use dispatch_core::controllers;
use dispatch_core::lifecycle::{run_cluster, run_worker};
use dispatch_core::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "dispatch-core")]
#[command(about = "HTTP request-dispatch server", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "dispatch.toml", env = "DISPATCH_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single worker
    Serve {
        /// Worker slot id, set by the supervisor
        #[arg(long, env = "DISPATCH_WORKER_ID")]
        worker_id: Option<usize>,
    },
    /// Run the worker supervisor
    Cluster,
    /// Validate the configuration and print the effective settings
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let source = FileSource::new(cli.config.clone());

    match cli.command.unwrap_or(Commands::Serve { worker_id: None }) {
        Commands::Check => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            println!("# configuration OK: {}", cli.config.display());
        }
        Commands::Serve { worker_id } => {
            let config = load(&source)?;
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %source.describe(),
                worker = ?worker_id,
                "dispatch-core starting"
            );
            let site_root = config.site.root.clone();
            run_worker(config, Arc::new(source), worker_id, move |dispatcher| {
                controllers::register_builtin(dispatcher)?;
                if let Some(root) = site_root {
                    controllers::register_static_site(dispatcher, root)?;
                }
                Ok(())
            })
            .await?;
        }
        Commands::Cluster => {
            let config = load(&source)?;
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                config = %source.describe(),
                workers = config.cluster.worker_count(),
                "dispatch-core supervisor starting"
            );
            run_cluster(config, &cli.config).await?;
        }
    }

    Ok(())
}

/// Load configuration and initialize logging from it.
fn load(source: &FileSource) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let config = source.load()?;
    init_logging(&config.observability);
    Ok(config)
}
