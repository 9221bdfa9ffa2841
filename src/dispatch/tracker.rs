//! In-flight request accounting.
//!
//! # Responsibilities
//! - Count requests currently being dispatched
//! - Hand out sequential request numbers for tracing
//! - Let shutdown wait for in-flight requests to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;

/// Tracks requests between deadline arming and response finalization.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    active: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new request. The returned guard decrements on drop, so a
    /// cancelled or panicking dispatch is still accounted for.
    pub fn track(&self) -> RequestGuard {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let sequence = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_in_flight(active);

        RequestGuard {
            active: Arc::clone(&self.active),
            sequence,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Wait until no request is in flight, or `timeout` passes.
    /// Returns whether the tracker drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Guard held for the lifetime of one dispatch.
#[derive(Debug)]
pub struct RequestGuard {
    active: Arc<AtomicU64>,
    sequence: u64,
}

impl RequestGuard {
    /// Sequential number of this request within the worker.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_in_flight(remaining);
    }
}
