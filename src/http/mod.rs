//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, fallback to the dispatcher)
//!     → request.rs (request ID, target validation, body readers)
//!     → [dispatch loop picks the handler]
//!     → response.rs (rejections and terminal replies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{BodyError, REQUEST_ID_HEADER};
pub use server::{HttpServer, ServerError};
