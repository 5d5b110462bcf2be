//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::PipelineConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the environment, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: PipelineConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, validated.
pub fn load_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply deployment environment variables on top of file values.
pub fn apply_env_overrides<F>(config: &mut PipelineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("AUDIT_SERVICE_URL") {
        config.audit.service_url = url;
    }
    if let Some(path) = lookup("CREATE_AUDIT_RECORD_URL") {
        config.audit.create_record_path = path;
    }
    if let Some(flag) = lookup("CREATE_AUDIT_RECORD_FLAG") {
        config.audit.enabled = flag.trim() == "1";
    }
    if let Some(hosts) = lookup("CONTAINER_IP") {
        config.tracing.collector_hosts = hosts;
    }
    if let Some(namespace) = lookup("METRICS_NAMESPACE") {
        config.metrics.namespace = namespace;
    }
    if let Some(system_id) = lookup("SYSTEM_ID") {
        config.service.system_id = system_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AUDIT_SERVICE_URL", "http://audit:9000"),
            ("CREATE_AUDIT_RECORD_FLAG", "1"),
            ("CONTAINER_IP", "10.0.0.5,10.0.0.6"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert!(config.audit.enabled);
        assert_eq!(config.audit.service_url, "http://audit:9000");
        assert_eq!(config.tracing.candidates(), vec!["10.0.0.5", "10.0.0.6"]);
        assert_eq!(config.metrics.namespace, "DevHubEverestek");
    }

    #[test]
    fn test_flag_other_than_one_disables() {
        let mut config = PipelineConfig::default();
        config.audit.enabled = true;
        apply_env_overrides(&mut config, |k| {
            (k == "CREATE_AUDIT_RECORD_FLAG").then(|| "0".to_string())
        });
        assert!(!config.audit.enabled);
    }

    #[test]
    fn test_load_config_reports_validation_errors() {
        let path = std::env::temp_dir().join("audit_pipeline_invalid_config.toml");
        fs::write(&path, "[tracing]\nbatch_size = 0\n").unwrap();

        let result = load_config(&path);
        let _ = fs::remove_file(&path);

        match result {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.contains(&ValidationError::ZeroTracingSetting("batch_size")));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }
}
