//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (before any route runs):
//!     → rate_limit.rs (per-source counter, 429 over threshold)
//!     → restrictor.rs (disabled path patterns, 401)
//!     → Pass to dispatch
//!
//! Outgoing response:
//!     → headers.rs (CORS, cluster-id)
//! ```
//!
//! # Design Decisions
//! - Rejections are expected control paths, not errors
//! - Shared tables are refreshed off the hot path (decay task, atomic swap)

pub mod headers;
pub mod rate_limit;
pub mod restrictor;

pub use rate_limit::{RateDecision, RateLimiter};
pub use restrictor::{PathRestrictor, PathRestrictorCache};
