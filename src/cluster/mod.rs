//! Cluster subsystem.
//!
//! # Data Flow
//! ```text
//! `cluster` command
//!     → supervisor.rs spawns N workers (worker.rs re-executes the binary
//!       as `serve` with DISPATCH_WORKER_ID set)
//!     → every worker binds the same ports (SO_REUSEPORT)
//!
//! Worker exit → monitor task → supervisor → respawn after backoff
//! Config change / SIGHUP → RestartHandle → supervisor poll → full restart
//! ```

pub mod supervisor;
pub mod worker;

pub use supervisor::{ClusterError, ClusterStatus, ClusterSupervisor};
pub use worker::{RestartHandle, WorkerCommand, WorkerRecord, WorkerState, WORKER_ID_ENV};
