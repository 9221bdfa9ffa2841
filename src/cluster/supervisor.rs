//! Worker pool supervision.
//!
//! # Responsibilities
//! - Start the configured number of worker processes, one per slot
//! - Respawn a slot whose worker exits, with backoff for crash loops
//! - Poll the restart flag and replace every worker when it is raised,
//!   applying cluster settings staged with the request
//! - Stop all workers on shutdown
//!
//! # Design Decisions
//! - Each worker has a monitor task that owns the `Child` and reports its
//!   exit over a channel; the supervisor loop is the only writer of state
//! - Full restarts bump a generation number. Exits and pending respawns
//!   from an older generation never touch the new workers
//! - A worker that ran for `stable_after` before exiting starts a fresh
//!   failure streak, so an occasional crash respawns quickly

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::cluster::worker::{RestartHandle, WorkerCommand, WorkerRecord, WorkerState};
use crate::config::ClusterConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Error type for the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Failed to spawn worker {id}: {source}")]
    Spawn { id: usize, source: io::Error },
}

/// Counters and worker table shared with observers.
#[derive(Debug, Default)]
pub struct ClusterStatus {
    spawned: AtomicU64,
    exited: AtomicU64,
    full_restarts: AtomicU64,
    workers: Mutex<Vec<WorkerRecord>>,
}

impl ClusterStatus {
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn exited(&self) -> u64 {
        self.exited.load(Ordering::Relaxed)
    }

    pub fn full_restarts(&self) -> u64 {
        self.full_restarts.load(Ordering::Relaxed)
    }

    /// Workers that are starting or running.
    pub fn live(&self) -> usize {
        self.workers().iter().filter(|w| w.is_live()).count()
    }

    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.workers
            .lock()
            .expect("cluster status mutex poisoned")
            .clone()
    }

    fn reset(&self, count: usize, generation: u64) {
        let mut workers = self.workers.lock().expect("cluster status mutex poisoned");
        *workers = (0..count).map(|id| WorkerRecord::new(id, generation)).collect();
    }

    /// Apply `f` to the record of slot `id` if it still belongs to `generation`.
    fn update<R>(&self, id: usize, generation: u64, f: impl FnOnce(&mut WorkerRecord) -> R) -> Option<R> {
        let mut workers = self.workers.lock().expect("cluster status mutex poisoned");
        workers
            .get_mut(id)
            .filter(|record| record.generation == generation)
            .map(f)
    }
}

/// Reported by a monitor task when its worker is gone.
#[derive(Debug)]
struct WorkerExit {
    id: usize,
    generation: u64,
    code: Option<i32>,
    uptime: Duration,
    /// The supervisor asked for this exit.
    stopped: bool,
}

struct Slot {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps `worker_count` worker processes alive.
pub struct ClusterSupervisor {
    config: ClusterConfig,
    command: WorkerCommand,
    restart: RestartHandle,
    status: Arc<ClusterStatus>,
    generation: u64,
    slots: HashMap<usize, Slot>,
    respawns: JoinSet<(usize, u64)>,
    exits_tx: mpsc::UnboundedSender<WorkerExit>,
    exits_rx: mpsc::UnboundedReceiver<WorkerExit>,
}

impl ClusterSupervisor {
    pub fn new(config: ClusterConfig, command: WorkerCommand) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            config,
            command,
            restart: RestartHandle::new(),
            status: Arc::new(ClusterStatus::default()),
            generation: 0,
            slots: HashMap::new(),
            respawns: JoinSet::new(),
            exits_tx,
            exits_rx,
        }
    }

    /// Handle that raises the full-restart flag.
    pub fn restart_handle(&self) -> RestartHandle {
        self.restart.clone()
    }

    pub fn status(&self) -> Arc<ClusterStatus> {
        Arc::clone(&self.status)
    }

    /// Supervise workers until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ClusterError> {
        tracing::info!(
            workers = self.config.worker_count(),
            program = %self.command.program().display(),
            "Cluster supervisor starting"
        );

        if let Err(e) = self.spawn_all() {
            self.teardown().await;
            return Err(e);
        }

        let mut poll = time::interval(self.config.restart_poll_interval());
        poll.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Cluster supervisor received shutdown signal");
                    break;
                }
                _ = poll.tick() => {
                    if self.restart.take() {
                        if let Err(e) = self.restart_all().await {
                            tracing::error!(error = %e, "Full restart failed, retrying on next poll");
                            self.restart.request();
                        }
                        if poll.period() != self.config.restart_poll_interval() {
                            poll = time::interval(self.config.restart_poll_interval());
                            poll.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                        }
                    }
                }
                Some(exit) = self.exits_rx.recv() => self.handle_exit(exit),
                Some(Ok((id, generation))) = self.respawns.join_next() => {
                    if generation == self.generation {
                        self.respawn(id);
                    }
                }
            }
        }

        self.teardown().await;
        tracing::info!(
            spawned = self.status.spawned(),
            full_restarts = self.status.full_restarts(),
            "Cluster supervisor stopped"
        );
        Ok(())
    }

    fn spawn_all(&mut self) -> Result<(), ClusterError> {
        let count = self.config.worker_count();
        self.generation += 1;
        self.status.reset(count, self.generation);

        for id in 0..count {
            self.spawn_worker(id)?;
        }
        Ok(())
    }

    fn spawn_worker(&mut self, id: usize) -> Result<(), ClusterError> {
        let generation = self.generation;
        let child = self
            .command
            .spawn(id)
            .map_err(|source| ClusterError::Spawn { id, source })?;
        let pid = child.id();

        self.status.update(id, generation, |record| {
            record.pid = pid;
            record.state = WorkerState::Running;
            record.started_at = Instant::now();
        });
        self.status.spawned.fetch_add(1, Ordering::Relaxed);
        metrics::record_worker_event("spawned");
        tracing::info!(worker = id, pid = ?pid, generation, "Worker started");

        let stop = CancellationToken::new();
        let task = tokio::spawn(monitor(
            id,
            generation,
            child,
            stop.clone(),
            self.exits_tx.clone(),
        ));
        self.slots.insert(id, Slot { stop, task });
        Ok(())
    }

    fn respawn(&mut self, id: usize) {
        if self.slots.contains_key(&id) {
            return;
        }
        metrics::record_worker_event("respawned");
        if let Err(e) = self.spawn_worker(id) {
            tracing::error!(worker = id, error = %e, "Worker respawn failed");
            let failures = self
                .status
                .update(id, self.generation, |record| {
                    record.state = WorkerState::Exited(None);
                    record.consecutive_failures += 1;
                    record.consecutive_failures
                })
                .unwrap_or(1);
            self.schedule_respawn(id, failures);
        }
    }

    fn schedule_respawn(&mut self, id: usize, failures: u32) {
        let delay = calculate_backoff(
            failures,
            self.config.respawn_base_delay_ms,
            self.config.respawn_max_delay_ms,
        );
        tracing::info!(worker = id, delay_ms = delay.as_millis() as u64, failures, "Scheduling worker respawn");

        let generation = self.generation;
        self.respawns.spawn(async move {
            time::sleep(delay).await;
            (id, generation)
        });
    }

    /// Update the worker table for an exit. Returns the failure streak.
    fn record_exit(&mut self, exit: &WorkerExit) -> u32 {
        self.status.exited.fetch_add(1, Ordering::Relaxed);
        metrics::record_worker_event("exited");

        let stable = exit.uptime >= self.config.stable_after();
        self.status
            .update(exit.id, exit.generation, |record| {
                record.state = WorkerState::Exited(exit.code);
                record.pid = None;
                if stable {
                    record.consecutive_failures = 0;
                }
                record.consecutive_failures += 1;
                record.consecutive_failures
            })
            .unwrap_or(1)
    }

    fn handle_exit(&mut self, exit: WorkerExit) {
        let failures = self.record_exit(&exit);
        if exit.stopped || exit.generation != self.generation {
            return;
        }

        self.slots.remove(&exit.id);
        tracing::warn!(
            worker = exit.id,
            code = ?exit.code,
            uptime_ms = exit.uptime.as_millis() as u64,
            "Worker exited"
        );

        if self.config.restart_on_failure {
            self.schedule_respawn(exit.id, failures);
        } else {
            tracing::info!(worker = exit.id, "Restart on failure disabled, slot stays empty until the next full restart");
        }
    }

    async fn restart_all(&mut self) -> Result<(), ClusterError> {
        tracing::info!(generation = self.generation, "Restarting all workers");
        self.teardown().await;

        self.status.full_restarts.fetch_add(1, Ordering::Relaxed);
        metrics::record_worker_event("full_restart");

        if let Some(config) = self.restart.take_config() {
            tracing::info!(
                workers = config.worker_count(),
                restart_on_failure = config.restart_on_failure,
                "Applying updated cluster settings"
            );
            self.config = config;
        }

        if let Err(e) = self.spawn_all() {
            self.teardown().await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop every worker of the current generation and wait for them.
    async fn teardown(&mut self) {
        self.respawns.abort_all();

        let slots: Vec<Slot> = self.slots.drain().map(|(_, slot)| slot).collect();
        if slots.is_empty() {
            return;
        }
        for slot in &slots {
            slot.stop.cancel();
        }

        let timeout = self.config.teardown_timeout();
        let waits = futures_util::future::join_all(slots.into_iter().map(|slot| slot.task));
        if time::timeout(timeout, waits).await.is_err() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "Workers did not exit within teardown timeout");
        }

        while let Ok(exit) = self.exits_rx.try_recv() {
            self.record_exit(&exit);
        }
    }
}

/// Owns one worker process until it exits or is told to stop.
async fn monitor(
    id: usize,
    generation: u64,
    mut child: Child,
    stop: CancellationToken,
    exits: mpsc::UnboundedSender<WorkerExit>,
) {
    let started = Instant::now();

    let (code, stopped) = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => (status.code(), false),
            Err(e) => {
                tracing::error!(worker = id, error = %e, "Failed to wait for worker");
                (None, false)
            }
        },
        _ = stop.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!(worker = id, error = %e, "Failed to kill worker");
            }
            (None, true)
        }
    };

    let _ = exits.send(WorkerExit {
        id,
        generation,
        code,
        uptime: started.elapsed(),
        stopped,
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(workers: usize) -> ClusterConfig {
        ClusterConfig {
            parallelism: workers,
            restart_on_failure: true,
            restart_poll_interval_ms: 20,
            respawn_base_delay_ms: 10,
            respawn_max_delay_ms: 50,
            stable_after_secs: 30,
            teardown_timeout_secs: 5,
        }
    }

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh").arg("-c").arg(script)
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn crashed_workers_are_respawned() {
        let supervisor = ClusterSupervisor::new(config(2), shell("exit 1"));
        let status = supervisor.status();
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(rx));

        assert!(wait_until(|| status.spawned() >= 6).await);
        assert!(status.exited() >= 2);
        assert_eq!(status.full_restarts(), 0);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn exited_slots_stay_empty_without_restart_on_failure() {
        let cfg = ClusterConfig {
            restart_on_failure: false,
            ..config(1)
        };
        let supervisor = ClusterSupervisor::new(cfg, shell("exit 3"));
        let status = supervisor.status();
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(rx));

        assert!(wait_until(|| status.exited() == 1).await);
        time::sleep(Duration::from_millis(100)).await;

        assert_eq!(status.spawned(), 1);
        assert_eq!(status.live(), 0);
        assert_eq!(status.workers()[0].state, WorkerState::Exited(Some(3)));

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn restart_flag_replaces_every_worker() {
        let supervisor = ClusterSupervisor::new(config(2), shell("sleep 30"));
        let status = supervisor.status();
        let restart = supervisor.restart_handle();
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(rx));

        assert!(wait_until(|| status.spawned() == 2).await);
        let first_pids: Vec<_> = status.workers().iter().map(|w| w.pid).collect();

        restart.request();
        assert!(wait_until(|| status.full_restarts() == 1 && status.spawned() == 4).await);

        let workers = status.workers();
        assert_eq!(status.live(), 2);
        assert!(workers.iter().all(|w| w.generation == 2));
        assert_ne!(workers.iter().map(|w| w.pid).collect::<Vec<_>>(), first_pids);
        assert!(!restart.is_requested());

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(10), task)
            .await
            .expect("supervisor should stop")
            .unwrap()
            .unwrap();
        assert_eq!(status.live(), 0);
    }

    #[tokio::test]
    async fn reconfigured_restart_uses_new_parallelism() {
        let supervisor = ClusterSupervisor::new(config(1), shell("sleep 30"));
        let status = supervisor.status();
        let restart = supervisor.restart_handle();
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(rx));

        assert!(wait_until(|| status.spawned() == 1).await);
        assert_eq!(status.live(), 1);

        restart.reconfigure(config(2));
        assert!(wait_until(|| status.full_restarts() == 1 && status.live() == 2).await);
        assert_eq!(status.workers().len(), 2);
        assert_eq!(status.spawned(), 3);

        tx.send(()).unwrap();
        time::timeout(Duration::from_secs(10), task)
            .await
            .expect("supervisor should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let supervisor = ClusterSupervisor::new(
            config(1),
            WorkerCommand::new("/nonexistent/dispatch-worker"),
        );
        let (_tx, rx) = broadcast::channel(1);
        let err = supervisor.run(rx).await.unwrap_err();
        assert!(matches!(err, ClusterError::Spawn { id: 0, .. }));
    }
}
