//! Per-source request throttling with periodic decay.
//!
//! Every accepted request bumps its source's counter; a background task
//! subtracts a fixed amount from every counter on an interval. Sustained
//! excess traffic therefore stays throttled while the penalty drains over
//! time instead of resetting at a window boundary (a leaky bucket
//! approximation).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request admitted; `count` is the source's counter after increment.
    Allowed { count: u64 },
    /// Source is over the threshold; the counter was not incremented.
    Limited { count: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Request counters keyed by source address.
#[derive(Debug)]
pub struct RateLimiter {
    counters: DashMap<String, u64>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            counters: DashMap::new(),
            config,
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Account for one request from `source`.
    pub fn check(&self, source: &str) -> RateDecision {
        if !self.config.enabled {
            return RateDecision::Allowed { count: 0 };
        }

        let mut counter = self.counters.entry(source.to_string()).or_insert(0);
        if *counter > self.config.threshold {
            return RateDecision::Limited { count: *counter };
        }
        *counter += 1;
        RateDecision::Allowed { count: *counter }
    }

    /// Run one decay pass. Returns the number of entries evicted.
    pub fn decay(&self) -> usize {
        let amount = self.config.reduction_amount;
        let evict = self.config.evict_idle;
        let before = self.counters.len();

        self.counters.retain(|_, count| {
            *count = count.saturating_sub(amount);
            !evict || *count > 0
        });

        before - self.counters.len()
    }

    /// Current counter for a source (0 when untracked).
    pub fn count(&self, source: &str) -> u64 {
        self.counters.get(source).map(|c| *c).unwrap_or(0)
    }

    /// Number of distinct sources currently tracked.
    pub fn tracked_sources(&self) -> usize {
        self.counters.len()
    }

    /// Decay counters on the configured interval until shutdown.
    pub async fn run_decay(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::debug!("Rate limiting disabled, decay task not started");
            return;
        }

        tracing::info!(
            threshold = self.config.threshold,
            interval_ms = self.config.reduction_interval_ms,
            amount = self.config.reduction_amount,
            "Rate limit decay starting"
        );

        let mut ticker = time::interval(self.config.reduction_interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.decay();
                    if evicted > 0 {
                        tracing::trace!(evicted, remaining = self.counters.len(), "Idle rate limit entries evicted");
                    }
                    metrics::record_rate_limit_sources(self.counters.len());
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limit decay received shutdown signal");
                    break;
                }
            }
        }
    }
}
