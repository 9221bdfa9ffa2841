//! Timeout enforcement.
//!
//! # Responsibilities
//! - Arm a request-wide deadline before any dispatch work starts
//! - Let handlers lift the deadline for known-slow operations
//! - Signal cancellation to cooperative handler work when it fires
//!
//! # Design Decisions
//! - Uses Tokio's timer facilities
//! - Lifting is one-way: a lifted deadline never fires
//! - Firing cancels the request's `CancellationToken`; the dispatcher also
//!   drops the in-flight handler future, so its result can never be sent

use std::future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A request-wide deadline.
#[derive(Debug)]
pub struct Deadline {
    limit: Duration,
    started: Instant,
    lifted: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl Deadline {
    /// Arm a deadline `limit` from now.
    pub fn arm(limit: Duration) -> Self {
        let (lifted, _) = watch::channel(false);
        Self {
            limit,
            started: Instant::now(),
            lifted,
            cancel: CancellationToken::new(),
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Disarm the deadline for the rest of the request.
    pub fn lift(&self) {
        if !self.lifted.send_replace(true) {
            tracing::debug!(limit_ms = self.limit.as_millis() as u64, "Response time restriction lifted");
        }
    }

    pub fn is_lifted(&self) -> bool {
        *self.lifted.borrow()
    }

    /// Token cancelled when the deadline fires.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves once the deadline passes without having been lifted.
    ///
    /// Once lifted, this future never resolves.
    pub async fn expired(&self) {
        let mut lifted = self.lifted.subscribe();

        let fired = tokio::select! {
            _ = tokio::time::sleep_until(self.started + self.limit) => !self.is_lifted(),
            _ = lifted.wait_for(|lifted| *lifted) => false,
        };

        if !fired {
            future::pending::<()>().await;
        }
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_and_cancels() {
        let deadline = Deadline::arm(Duration::from_millis(20));
        let token = deadline.cancellation();

        tokio::time::timeout(Duration::from_secs(2), deadline.expired())
            .await
            .expect("deadline should fire");
        assert!(token.is_cancelled());
        assert!(deadline.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn lifted_deadline_never_fires() {
        let deadline = Deadline::arm(Duration::from_millis(20));
        deadline.lift();
        assert!(deadline.is_lifted());

        let fired = tokio::time::timeout(Duration::from_millis(100), deadline.expired()).await;
        assert!(fired.is_err());
        assert!(!deadline.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn lifting_while_waiting_disarms() {
        let deadline = std::sync::Arc::new(Deadline::arm(Duration::from_millis(80)));
        let d = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            d.lift();
        });

        let fired = tokio::time::timeout(Duration::from_millis(250), deadline.expired()).await;
        assert!(fired.is_err());
    }
}
