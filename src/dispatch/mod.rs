//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Request from a listener
//!     → engine.rs arms the deadline, checks rate limit and restrictions
//!     → exchange.rs wraps the request for providers and handlers
//!     → context providers run once
//!     → engine.rs scans routes by priority
//!         handler → outcome.rs (Respond | Fallthrough | Redirect) or error
//!     → reply.rs serializes the chosen reply
//!     → Response to the client
//! ```
//!
//! # Design Decisions
//! - Control flow between handlers and the loop is a returned value, not
//!   an unwinding error
//! - Every path through the loop ends in exactly one `Reply`

pub mod engine;
pub mod exchange;
pub mod outcome;
pub mod reply;
pub mod tracker;

pub use engine::{DispatchSettings, Dispatcher};
pub use exchange::Exchange;
pub use outcome::{HandlerResult, Outcome};
pub use reply::{IntoReply, Reply, ReplyBody};
pub use tracker::{RequestGuard, RequestTracker};
