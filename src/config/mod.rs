//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → environment overrides (AUDIT_SERVICE_URL, CONTAINER_IP, ...)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → sections cloned into each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AuditConfig, LoggingConfig, MetricsBackendKind, MetricsConfig, PipelineConfig, ServerConfig,
    ServiceConfig, TracingConfig,
};
