//! Request-scoped tracing and audit-correlation pipeline.
//!
//! Propagates a correlation identity through each request, captures entity
//! changes from the persistence layer, and ships spans and audit records to
//! external collectors without blocking the request or its transaction.

// Core subsystems
pub mod audit;
pub mod capture;
pub mod config;
pub mod context;

// Service surface
pub mod http;
pub mod persistence;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use audit::{AuditDispatcher, AuditRecorder};
pub use config::PipelineConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::{StructuredLogger, Tracer};
