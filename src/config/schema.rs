//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files, and
//! every section carries defaults so a minimal (or empty) file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the dispatch server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening ports and per-request limits.
    pub server: ListenerConfig,

    /// Optional TLS material.
    pub tls: TlsConfig,

    /// Per-source request throttling.
    pub rate_limit: RateLimitConfig,

    /// Configuration-driven path kill-switches.
    pub restrictions: RestrictionConfig,

    /// Worker pool supervision.
    pub cluster: ClusterConfig,

    /// Static site served behind the API routes.
    pub site: SiteConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Listener and dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Ports to listen on. Each port gets its own listener bound to the
    /// same dispatcher.
    pub ports: Vec<u16>,

    /// Interface to bind on.
    pub bind_host: String,

    /// Maximum time a request may take before the response is forced.
    pub maximum_request_time_ms: u64,

    /// Log the elapsed time of every request at info level.
    pub collect_all_timings: bool,

    /// Maximum request body size accepted by the body readers.
    pub max_body_size: usize,

    /// Internal redirects allowed within one request.
    pub max_internal_redirects: usize,
}

impl ListenerConfig {
    pub fn maximum_request_time(&self) -> Duration {
        Duration::from_millis(self.maximum_request_time_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ports: vec![5000],
            bind_host: "0.0.0.0".to_string(),
            maximum_request_time_ms: 60_000,
            collect_all_timings: false,
            max_body_size: 2 * 1024 * 1024, // 2MB
            max_internal_redirects: 32,
        }
    }
}

/// TLS configuration for the listeners.
///
/// `key` and `cert` accept either a path to a PEM file or the PEM text itself.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Private key (PEM path or inline PEM).
    pub key: Option<String>,

    /// Certificate chain (PEM path or inline PEM).
    pub cert: Option<String>,

    /// Force plain HTTP even when key and cert are configured.
    pub disabled: bool,
}

impl TlsConfig {
    /// Returns the key/cert pair when TLS should be used.
    pub fn material(&self) -> Option<(&str, &str)> {
        if self.disabled {
            return None;
        }
        match (self.key.as_deref(), self.cert.as_deref()) {
            (Some(key), Some(cert)) => Some((key, cert)),
            _ => None,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests a source may accumulate before being rejected.
    pub threshold: u64,

    /// Interval between counter decay passes in milliseconds.
    pub reduction_interval_ms: u64,

    /// Amount subtracted from every counter on each decay pass.
    pub reduction_amount: u64,

    /// Drop a source's entry once its counter has decayed to zero.
    pub evict_idle: bool,
}

impl RateLimitConfig {
    pub fn reduction_interval(&self) -> Duration {
        Duration::from_millis(self.reduction_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 250,
            reduction_interval_ms: 250,
            reduction_amount: 1,
            evict_idle: true,
        }
    }
}

/// Path restriction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestrictionConfig {
    /// How often the rules are re-read from the configuration source.
    pub refresh_interval_ms: u64,

    /// Restriction rules, evaluated in order.
    pub rules: Vec<RestrictionRule>,
}

impl RestrictionConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for RestrictionConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 60_000,
            rules: Vec::new(),
        }
    }
}

/// A single raw (uncompiled) path restriction.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RestrictionRule {
    /// Regular expression tested against the request target.
    pub pattern: String,

    /// When false, matching requests are rejected with 401.
    #[serde(default)]
    pub enabled: bool,

    /// Message returned to the client when the path is disabled.
    #[serde(default = "default_restriction_message")]
    pub message: String,
}

fn default_restriction_message() -> String {
    "Path has been disabled".to_string()
}

/// Cluster supervision configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of worker processes (0 = one per core).
    pub parallelism: usize,

    /// Respawn workers that exit.
    pub restart_on_failure: bool,

    /// How often the restart flag is polled, in milliseconds.
    pub restart_poll_interval_ms: u64,

    /// Base delay for respawn backoff in milliseconds.
    pub respawn_base_delay_ms: u64,

    /// Maximum delay for respawn backoff in milliseconds.
    pub respawn_max_delay_ms: u64,

    /// A worker that ran this long before exiting resets its failure streak.
    pub stable_after_secs: u64,

    /// How long a full restart waits for old workers to exit.
    pub teardown_timeout_secs: u64,
}

impl ClusterConfig {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.parallelism == 0 {
            num_cpus::get()
        } else {
            self.parallelism
        }
    }

    pub fn restart_poll_interval(&self) -> Duration {
        Duration::from_millis(self.restart_poll_interval_ms)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            restart_on_failure: true,
            restart_poll_interval_ms: 1_000,
            respawn_base_delay_ms: 100,
            respawn_max_delay_ms: 10_000,
            stable_after_secs: 30,
            teardown_timeout_secs: 10,
        }
    }
}

/// Static site served for every non-`/api` path no route claims.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SiteConfig {
    /// Directory holding the built site (must contain `index.html`).
    /// Unset means no site is served.
    pub root: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
