//! Path restrictions: configuration-driven kill-switches for routes.
//!
//! The rule list is re-read from the configuration source on a timer,
//! compiled off to the side, then published with a single atomic swap.
//! Dispatches read whichever complete list is current.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use regex::Regex;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::{ConfigSource, RestrictionRule};

/// A compiled restriction.
#[derive(Debug, Clone)]
pub struct PathRestrictor {
    pattern: Regex,
    enabled: bool,
    message: String,
}

impl PathRestrictor {
    pub fn compile(rule: &RestrictionRule) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&rule.pattern)?,
            enabled: rule.enabled,
            message: rule.message.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn matches(&self, target: &str) -> bool {
        self.pattern.is_match(target)
    }
}

/// The current set of restrictors.
#[derive(Debug)]
pub struct PathRestrictorCache {
    restrictors: ArcSwap<Vec<PathRestrictor>>,
}

impl PathRestrictorCache {
    pub fn new() -> Self {
        Self {
            restrictors: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn from_rules(rules: &[RestrictionRule]) -> Self {
        let cache = Self::new();
        cache.replace(rules);
        cache
    }

    /// Compile `rules` and publish them. Rules whose pattern does not
    /// compile are logged and left out. Returns the number published.
    pub fn replace(&self, rules: &[RestrictionRule]) -> usize {
        let compiled: Vec<PathRestrictor> = rules
            .iter()
            .filter_map(|rule| match PathRestrictor::compile(rule) {
                Ok(restrictor) => Some(restrictor),
                Err(e) => {
                    tracing::warn!(pattern = %rule.pattern, error = %e, "Skipping invalid path restriction");
                    None
                }
            })
            .collect();

        let count = compiled.len();
        self.restrictors.store(Arc::new(compiled));
        count
    }

    /// Message of the first disabled restrictor matching `target`.
    pub fn check(&self, target: &str) -> Option<String> {
        self.restrictors
            .load()
            .iter()
            .find(|r| r.matches(target) && !r.enabled)
            .map(|r| r.message.clone())
    }

    pub fn len(&self) -> usize {
        self.restrictors.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-read the rules from `source` every `interval` until shutdown.
    /// A failed load keeps the current rules.
    pub async fn run_refresh(
        self: Arc<Self>,
        source: Arc<dyn ConfigSource>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(
            source = %source.describe(),
            interval_ms = interval.as_millis() as u64,
            "Path restriction refresh starting"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match source.load() {
                        Ok(config) => {
                            let count = self.replace(&config.restrictions.rules);
                            tracing::trace!(count, "Path restrictions refreshed");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to refresh path restrictions, keeping current rules");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Path restriction refresh received shutdown signal");
                    break;
                }
            }
        }
    }
}

impl Default for PathRestrictorCache {
    fn default() -> Self {
        Self::new()
    }
}
