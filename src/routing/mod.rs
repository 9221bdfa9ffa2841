//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     controllers call RouteRegistry::register(RouteSpec, action)
//!     → matcher.rs compiles the pattern and verb constraint
//!     → router.rs re-sorts by priority (descending, stable)
//!
//! Per scanning pass:
//!     Dispatcher loads a snapshot
//!     → walks handlers in order
//!     → matcher.rs decides pattern + verb
//! ```
//!
//! # Design Decisions
//! - Regular expressions compiled once, at registration
//! - Snapshot per pass: registration never tears an in-flight scan
//! - First non-fallthrough match wins

pub mod matcher;
pub mod router;

pub use matcher::{MethodFilter, PathPattern, RouteSpec, RoutingError};
pub use router::{RouteAction, RouteHandler, RouteId, RouteRegistry};
