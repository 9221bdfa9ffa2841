//! Built-in status routes.
//!
//! - `GET /api/status`: liveness plus a few counters
//! - `GET /api/serverLoad`: host and process load facts

use std::time::Instant;

use axum::http::Method;
use serde::Serialize;

use crate::dispatch::{Dispatcher, Exchange, Outcome, Reply};
use crate::routing::{RouteSpec, RoutingError};

#[derive(Debug, Serialize)]
struct StatusReport {
    status: &'static str,
    version: &'static str,
    worker: Option<usize>,
    uptime_secs: u64,
    in_flight: u64,
}

#[derive(Debug, Serialize)]
struct ServerLoad {
    cpus: usize,
    physical_cpus: usize,
    load_average: Option<[f64; 3]>,
    pid: u32,
    worker: Option<usize>,
    uptime_secs: u64,
}

/// Register the status routes on `dispatcher`.
pub fn register_builtin(dispatcher: &Dispatcher) -> Result<(), RoutingError> {
    let started = Instant::now();
    let worker = dispatcher.settings().worker_id;

    let tracker = dispatcher.tracker().clone();
    dispatcher.register(
        RouteSpec::new("^/api/status$")?.method(Method::GET),
        move |_ex: Exchange| {
            let report = StatusReport {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                worker,
                uptime_secs: started.elapsed().as_secs(),
                in_flight: tracker.active_count(),
            };
            async move { Ok(Outcome::Respond(Reply::json(&report)?)) }
        },
    );

    dispatcher.register(
        RouteSpec::new("^/api/serverLoad$")?.method(Method::GET),
        move |_ex: Exchange| async move {
            let load = ServerLoad {
                cpus: num_cpus::get(),
                physical_cpus: num_cpus::get_physical(),
                load_average: load_average().await,
                pid: std::process::id(),
                worker,
                uptime_secs: started.elapsed().as_secs(),
            };
            Ok(Outcome::Respond(Reply::json(&load)?))
        },
    );

    Ok(())
}

/// 1, 5 and 15 minute load averages, where the platform exposes them.
async fn load_average() -> Option<[f64; 3]> {
    let text = tokio::fs::read_to_string("/proc/loadavg").await.ok()?;
    parse_loadavg(&text)
}

fn parse_loadavg(text: &str) -> Option<[f64; 3]> {
    let mut fields = text.split_whitespace().map(str::parse::<f64>);
    Some([
        fields.next()?.ok()?,
        fields.next()?.ok()?,
        fields.next()?.ok()?,
    ])
}
