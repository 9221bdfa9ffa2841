//! Routes every worker serves regardless of the application mounted on it.
//!
//! - `system`: status and load reports under `/api`
//! - `static_site`: the built front-end, below every other route

pub mod static_site;
pub mod system;

pub use static_site::register_static_site;
pub use system::register_builtin;
