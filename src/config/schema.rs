//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Sentinel collector value that installs the local sink directly.
pub const LOCAL_COLLECTOR: &str = "local";

/// Root configuration for the audit pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identity of the service emitting spans and audit records.
    pub service: ServiceConfig,

    /// External audit service and change-capture settings.
    pub audit: AuditConfig,

    /// Span collector settings.
    pub tracing: TracingConfig,

    /// Metrics backend settings.
    pub metrics: MetricsConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Demo HTTP server settings.
    pub server: ServerConfig,
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Reported as `service.name` on exported spans.
    pub name: String,

    /// Originating system identifier carried in every audit payload.
    pub system_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "passenger_service".to_string(),
            system_id: "passenger-service".to_string(),
        }
    }
}

/// Audit service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Register change-capture hooks at all.
    pub enabled: bool,

    /// Base URL of the audit service (e.g., "http://audit:8000").
    pub service_url: String,

    /// Record-creation path appended to `service_url`.
    pub create_record_path: String,

    /// Timeout for one outbound delivery in seconds.
    pub timeout_secs: u64,

    /// Maximum concurrent in-flight deliveries.
    pub workers: usize,

    /// Pending deliveries held before new records are dropped.
    pub queue_capacity: usize,

    /// Entity types whose lifecycle events are audited.
    pub entity_types: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_url: "http://localhost:8000".to_string(),
            create_record_path: "/api/v1/audit-records".to_string(),
            timeout_secs: 10,
            workers: 4,
            queue_capacity: 1024,
            entity_types: vec!["Passenger".to_string(), "ShipCallManifest".to_string()],
        }
    }
}

impl AuditConfig {
    /// Full URL of the record-creation endpoint.
    pub fn record_url(&self) -> String {
        format!(
            "{}{}",
            self.service_url.trim_end_matches('/'),
            self.create_record_path
        )
    }
}

/// Span collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Comma-separated collector hosts tried in order, or "local".
    pub collector_hosts: String,

    /// Collector port.
    pub collector_port: u16,

    /// Collector path (OTLP/HTTP traces endpoint).
    pub collector_path: String,

    /// Spans per export batch.
    pub batch_size: usize,

    /// Maximum spans buffered before new spans are dropped.
    pub queue_capacity: usize,

    /// Flush interval for partially filled batches in milliseconds.
    pub flush_interval_ms: u64,

    /// Timeout for one export call in seconds.
    pub export_timeout_secs: u64,

    /// Connect to each candidate before accepting it.
    pub probe_on_startup: bool,

    /// Startup probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            collector_hosts: LOCAL_COLLECTOR.to_string(),
            collector_port: 4316,
            collector_path: "/v1/traces".to_string(),
            batch_size: 512,
            queue_capacity: 2048,
            flush_interval_ms: 5000,
            export_timeout_secs: 10,
            probe_on_startup: true,
            probe_timeout_ms: 500,
        }
    }
}

impl TracingConfig {
    /// Candidate collector hosts in configured order.
    pub fn candidates(&self) -> Vec<String> {
        self.collector_hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Whether the local sink is requested explicitly.
    pub fn is_local(&self) -> bool {
        self.collector_hosts.trim() == LOCAL_COLLECTOR
    }
}

/// Which backend receives the logger's error metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackendKind {
    /// Metric emission disabled; the logger warns instead.
    None,
    /// `metrics` facade counters (scraped through Prometheus).
    Recorder,
    /// JSON push to an HTTP metrics endpoint.
    Http,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Backend for error-count metrics.
    pub backend: MetricsBackendKind,

    /// Namespace the metrics are filed under.
    pub namespace: String,

    /// Push URL for the HTTP backend.
    pub push_url: String,

    /// Pending metric pushes before new ones are rejected.
    pub push_queue_capacity: usize,

    /// Expose a Prometheus scrape endpoint.
    pub prometheus_enabled: bool,

    /// Prometheus endpoint bind address.
    pub prometheus_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            backend: MetricsBackendKind::Recorder,
            namespace: "DevHubEverestek".to_string(),
            push_url: "http://localhost:9091/metrics".to_string(),
            push_queue_capacity: 256,
            prometheus_enabled: true,
            prometheus_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "audit_pipeline=info,tower_http=info".to_string(),
        }
    }
}

/// Demo HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}
