//! HTTP request-dispatch core.
//!
//! Route registry, context providers, the dispatch loop with fallthrough
//! and internal redirect, response serialization, per-source rate limiting,
//! configuration-driven path restrictions, and a supervisor that keeps a
//! pool of worker processes alive.

// Request path
pub mod context;
pub mod dispatch;
pub mod http;
pub mod net;
pub mod routing;

// Process shell
pub mod cluster;
pub mod config;
pub mod controllers;
pub mod lifecycle;

// Cross-cutting concerns
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::ServerConfig;
pub use dispatch::{Dispatcher, Exchange, HandlerResult, IntoReply, Outcome, Reply};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::RouteSpec;
