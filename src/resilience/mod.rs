//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request dispatch:
//!     → timeouts.rs (request-wide deadline, liftable, cancels on fire)
//!
//! Worker supervision:
//!     → backoff.rs (respawn delay for crash-looping workers)
//! ```
//!
//! # Design Decisions
//! - Every request has a deadline unless a handler explicitly lifts it
//! - Jittered backoff keeps crash loops from spinning the supervisor

pub mod backoff;
pub mod timeouts;

pub use timeouts::Deadline;
