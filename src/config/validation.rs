//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, intervals, durations)
//! - Check that restriction patterns compile
//! - Check TLS material is configured as a pair
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ServerConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    if server.ports.is_empty() {
        errors.push(ValidationError::new("server.ports", "at least one port is required"));
    }
    let mut seen = HashSet::new();
    for port in &server.ports {
        if *port == 0 {
            errors.push(ValidationError::new("server.ports", "port 0 is not allowed"));
        }
        if !seen.insert(port) {
            errors.push(ValidationError::new("server.ports", format!("port {} listed twice", port)));
        }
    }
    if server.maximum_request_time_ms == 0 {
        errors.push(ValidationError::new("server.maximum_request_time_ms", "must be greater than 0"));
    }
    if server.max_body_size == 0 {
        errors.push(ValidationError::new("server.max_body_size", "must be greater than 0"));
    }

    let tls = &config.tls;
    if tls.key.is_some() != tls.cert.is_some() {
        errors.push(ValidationError::new("tls", "key and cert must be configured together"));
    }

    let rate = &config.rate_limit;
    if rate.reduction_interval_ms == 0 {
        errors.push(ValidationError::new("rate_limit.reduction_interval_ms", "must be greater than 0"));
    }
    if rate.reduction_amount == 0 {
        errors.push(ValidationError::new("rate_limit.reduction_amount", "must be greater than 0"));
    }

    let restrictions = &config.restrictions;
    if restrictions.refresh_interval_ms == 0 {
        errors.push(ValidationError::new("restrictions.refresh_interval_ms", "must be greater than 0"));
    }
    for (i, rule) in restrictions.rules.iter().enumerate() {
        if let Err(e) = regex::Regex::new(&rule.pattern) {
            errors.push(ValidationError::new(
                format!("restrictions.rules[{}].pattern", i),
                e.to_string(),
            ));
        }
    }

    let cluster = &config.cluster;
    if cluster.restart_poll_interval_ms == 0 {
        errors.push(ValidationError::new("cluster.restart_poll_interval_ms", "must be greater than 0"));
    }
    if cluster.respawn_base_delay_ms > cluster.respawn_max_delay_ms {
        errors.push(ValidationError::new(
            "cluster.respawn_base_delay_ms",
            "must not exceed respawn_max_delay_ms",
        ));
    }

    if let Some(root) = &config.site.root {
        if root.as_os_str().is_empty() {
            errors.push(ValidationError::new("site.root", "must not be empty when set"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a valid socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
