//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared by value / Arc with subsystems
//!
//! Periodic refresh (path restrictions):
//!     ConfigSource::load on a timer
//!     → restrictor cache swaps in the new rules
//!
//! On file change (cluster mode):
//!     watcher.rs detects change
//!     → loader.rs loads & validates
//!     → supervisor restart is requested with the new cluster section
//!     → workers respawn with the new file
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError, ConfigSource, FileSource, StaticSource};
pub use schema::{
    ClusterConfig, ListenerConfig, LogFormat, ObservabilityConfig, RateLimitConfig,
    RestrictionConfig, RestrictionRule, ServerConfig, SiteConfig, TlsConfig,
};
