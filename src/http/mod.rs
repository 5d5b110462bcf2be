//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout, access tracing)
//!     → middleware.rs (correlation scope: trace id, authorization,
//!                      headers, actor id)
//!     → handlers (audited persistence writes)
//!     → middleware.rs (top-level audit, trace-id response header)
//!     → Send to client
//! ```

pub mod middleware;
pub mod server;

pub use middleware::{correlation_middleware, TRACE_ID_HEADER, TRACE_ID_RESPONSE_HEADER};
pub use server::{AppState, HttpServer};
