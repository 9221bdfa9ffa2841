//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured ports
//!     → listener.rs (one shareable socket per port)
//!     → tls.rs (optional rustls acceptor)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Ports are bound with SO_REUSEPORT so cluster workers share them
//! - TLS is optional; without material the server speaks plain HTTP

pub mod listener;
pub mod tls;

pub use listener::{bind_ports, ListenerError};
pub use tls::{load_tls_config, TlsError};
