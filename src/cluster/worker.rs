//! Worker processes and their bookkeeping.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::process::{Child, Command};

use crate::config::ClusterConfig;

/// Environment variable carrying a worker's slot id.
pub const WORKER_ID_ENV: &str = "DISPATCH_WORKER_ID";

/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-execute the running binary as `serve` with the same config file.
    pub fn current_exe(config_path: &Path) -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program)
            .arg("--config")
            .arg(config_path.to_string_lossy())
            .arg("serve"))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Start the process for slot `worker_id`.
    ///
    /// The child inherits stdout/stderr so worker logs share the supervisor's
    /// output, and it is killed if its handle is dropped.
    pub fn spawn(&self, worker_id: usize) -> io::Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(WORKER_ID_ENV, worker_id.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        command.spawn()
    }
}

/// Lifecycle of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    /// Process ended; `None` when it was killed by a signal.
    Exited(Option<i32>),
}

/// What the supervisor knows about one slot.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: usize,
    pub pid: Option<u32>,
    pub state: WorkerState,
    /// Full-restart generation this process belongs to.
    pub generation: u64,
    pub started_at: Instant,
    /// Exits in a row that happened before the worker was considered stable.
    pub consecutive_failures: u32,
}

impl WorkerRecord {
    pub fn new(id: usize, generation: u64) -> Self {
        Self {
            id,
            pid: None,
            state: WorkerState::Starting,
            generation,
            started_at: Instant::now(),
            consecutive_failures: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.state, WorkerState::Exited(_))
    }
}

/// Flag asking the supervisor for a full restart.
///
/// Any number of producers may raise it; the supervisor consumes it on its
/// next poll, so bursts of requests collapse into one restart. A restart
/// raised through [`RestartHandle::reconfigure`] also carries the cluster
/// settings the new generation starts with; the latest one wins.
#[derive(Debug, Clone, Default)]
pub struct RestartHandle {
    requested: Arc<AtomicBool>,
    staged: Arc<Mutex<Option<ClusterConfig>>>,
}

impl RestartHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            tracing::info!("Full cluster restart requested");
        }
    }

    /// Request a full restart that applies `config`.
    pub fn reconfigure(&self, config: ClusterConfig) {
        *self.staged.lock().expect("restart handle mutex poisoned") = Some(config);
        self.request();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Consume a pending request.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }

    /// Consume the staged cluster settings, if any.
    pub fn take_config(&self) -> Option<ClusterConfig> {
        self.staged.lock().expect("restart handle mutex poisoned").take()
    }
}
