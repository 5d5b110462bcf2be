//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers > 0, ports valid, batch sizes)
//! - Check endpoint URLs parse before any subsystem starts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;
use url::Url;

use crate::config::schema::{MetricsBackendKind, PipelineConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("audit.service_url '{0}' is not a valid URL")]
    InvalidAuditUrl(String),

    #[error("audit.{0} must be greater than zero")]
    ZeroAuditSetting(&'static str),

    #[error("tracing.collector_hosts must name at least one host or \"local\"")]
    NoCollectorHosts,

    #[error("tracing.{0} must be greater than zero")]
    ZeroTracingSetting(&'static str),

    #[error("metrics.push_url '{0}' is not a valid URL")]
    InvalidPushUrl(String),

    #[error("metrics.namespace must not be empty")]
    EmptyNamespace,

    #[error("server.request_timeout_secs must be greater than zero")]
    ZeroRequestTimeout,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.audit.enabled && Url::parse(&config.audit.record_url()).is_err() {
        errors.push(ValidationError::InvalidAuditUrl(config.audit.service_url.clone()));
    }
    if config.audit.workers == 0 {
        errors.push(ValidationError::ZeroAuditSetting("workers"));
    }
    if config.audit.queue_capacity == 0 {
        errors.push(ValidationError::ZeroAuditSetting("queue_capacity"));
    }
    if config.audit.timeout_secs == 0 {
        errors.push(ValidationError::ZeroAuditSetting("timeout_secs"));
    }

    if config.tracing.candidates().is_empty() {
        errors.push(ValidationError::NoCollectorHosts);
    }
    if config.tracing.collector_port == 0 {
        errors.push(ValidationError::ZeroTracingSetting("collector_port"));
    }
    if config.tracing.batch_size == 0 {
        errors.push(ValidationError::ZeroTracingSetting("batch_size"));
    }
    if config.tracing.queue_capacity == 0 {
        errors.push(ValidationError::ZeroTracingSetting("queue_capacity"));
    }

    if config.metrics.backend == MetricsBackendKind::Http
        && Url::parse(&config.metrics.push_url).is_err()
    {
        errors.push(ValidationError::InvalidPushUrl(config.metrics.push_url.clone()));
    }
    if config.metrics.namespace.trim().is_empty() {
        errors.push(ValidationError::EmptyNamespace);
    }

    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = PipelineConfig::default();
        config.audit.enabled = true;
        config.audit.service_url = "not a url".to_string();
        config.audit.workers = 0;
        config.tracing.collector_hosts = " , ".to_string();
        config.metrics.namespace = String::new();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ZeroAuditSetting("workers")));
        assert!(errors.contains(&ValidationError::NoCollectorHosts));
        assert!(errors.contains(&ValidationError::EmptyNamespace));
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let mut config = PipelineConfig::default();
        config.server.request_timeout_secs = 0;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::ZeroRequestTimeout]
        );
    }

    #[test]
    fn test_push_url_checked_only_for_http_backend() {
        let mut config = PipelineConfig::default();
        config.metrics.push_url = "::".to_string();
        assert!(validate_config(&config).is_ok());

        config.metrics.backend = MetricsBackendKind::Http;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidPushUrl("::".to_string())]);
    }
}
