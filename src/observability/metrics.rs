//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define dispatch metrics (requests, latency, rejections, signals)
//! - Expose a Prometheus-compatible scrape endpoint
//! - Track worker lifecycle events in cluster mode
//!
//! # Metrics
//! - `dispatch_requests_total` (counter): requests by method, status
//! - `dispatch_request_duration_seconds` (histogram): latency distribution
//! - `dispatch_rejections_total` (counter): pre-routing rejections by reason
//! - `dispatch_signals_total` (counter): handler fallthrough / redirect
//! - `dispatch_in_flight_requests` (gauge): requests currently dispatching
//! - `rate_limit_tracked_sources` (gauge): sources with a live counter
//! - `cluster_worker_events_total` (counter): spawn / exit / restart
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "dispatch_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("dispatch_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a request turned away before routing (`rate_limited`,
/// `route_disabled`, `bad_request`) or ended by the dispatcher itself.
pub fn record_rejection(reason: &'static str) {
    counter!("dispatch_rejections_total", "reason" => reason).increment(1);
}

/// Record what a handler returned (`respond`, `fallthrough`, `redirect`, `panic`).
pub fn record_signal(kind: &'static str) {
    counter!("dispatch_signals_total", "kind" => kind).increment(1);
}

pub fn record_in_flight(count: u64) {
    gauge!("dispatch_in_flight_requests").set(count as f64);
}

pub fn record_rate_limit_sources(count: usize) {
    gauge!("rate_limit_tracked_sources").set(count as f64);
}

/// Record a worker lifecycle event (`spawned`, `exited`, `respawned`, `full_restart`).
pub fn record_worker_event(event: &'static str) {
    counter!("cluster_worker_events_total", "event" => event).increment(1);
}
