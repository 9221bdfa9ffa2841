//! Request context subsystem.
//!
//! # Data Flow
//! ```text
//! Exchange created for a request
//!     → provider.rs runs every registered provider once, in order
//!     → providers write into values.rs (RequestContext)
//!     → handlers read / write the same context through the Exchange
//!     → context dropped with the Exchange when the response finalizes
//! ```
//!
//! # Design Decisions
//! - Context is per request, never shared
//! - Values are typed (`Any`), lookups downcast
//! - Provider failures are logged, never fatal to the request

pub mod provider;
pub mod values;

pub use provider::{ContextProvider, ContextProviderRegistry, ProvideContext};
pub use values::{ContextError, RequestContext};
