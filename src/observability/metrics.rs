//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count pipeline outcomes through the `metrics` facade
//! - Expose a Prometheus-compatible scrape endpoint
//! - Provide the external metrics backends used by the structured logger
//!
//! # Metrics
//! - `spans_exported_total` (counter): spans per export outcome
//! - `spans_dropped_total` (counter): spans dropped on a full queue
//! - `audit_deliveries_total` (counter): deliveries by outcome
//! - `audit_dispatch_dropped_total` (counter): records dropped before delivery
//! - `log_metric_push_total` (counter): logger metric pushes by outcome
//!
//! # Design Decisions
//! - Facade updates are cheap and no-ops when no recorder is installed
//! - Backends accept a datum synchronously and never block the caller

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use url::Url;

use crate::config::{MetricsBackendKind, MetricsConfig};
use crate::lifecycle::Shutdown;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus recorder"),
    }
}

pub fn record_span_export(outcome: &'static str, spans: usize) {
    metrics::counter!("spans_exported_total", "outcome" => outcome).increment(spans as u64);
}

pub fn record_span_dropped() {
    metrics::counter!("spans_dropped_total").increment(1);
}

pub fn record_delivery(outcome: &'static str) {
    metrics::counter!("audit_deliveries_total", "outcome" => outcome).increment(1);
}

pub fn record_dispatch_dropped() {
    metrics::counter!("audit_dispatch_dropped_total").increment(1);
}

pub fn record_metric_push(outcome: &'static str) {
    metrics::counter!("log_metric_push_total", "outcome" => outcome).increment(1);
}

/// Errors reported by a metrics backend.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics backend rejected {metric}: {reason}")]
    Rejected { metric: String, reason: String },

    #[error("metrics backend unavailable: {0}")]
    Unavailable(String),
}

/// One metric dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// A single count datum, shaped like a CloudWatch `MetricDatum`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDatum {
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub dimensions: Vec<Dimension>,
}

impl MetricDatum {
    /// Count datum with the given dimensions, stamped now.
    pub fn count(metric_name: &str, value: f64, dimensions: Vec<(String, String)>) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            value,
            unit: "Count".to_string(),
            timestamp: Utc::now(),
            dimensions: dimensions
                .into_iter()
                .map(|(name, value)| Dimension { name, value })
                .collect(),
        }
    }

    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

/// External destination for the structured logger's error metrics.
pub trait MetricsBackend: Send + Sync {
    fn put_metric(&self, namespace: &str, datum: MetricDatum) -> Result<(), MetricsError>;
}

/// Forwards each datum as a `metrics` counter `<namespace>_<MetricName>`.
#[derive(Debug, Default)]
pub struct RecorderBackend;

impl MetricsBackend for RecorderBackend {
    fn put_metric(&self, namespace: &str, datum: MetricDatum) -> Result<(), MetricsError> {
        if !datum.value.is_finite() || datum.value < 0.0 {
            return Err(MetricsError::Rejected {
                metric: datum.metric_name,
                reason: format!("count must be a non-negative number, got {}", datum.value),
            });
        }

        let name = format!("{}_{}", namespace, datum.metric_name);
        let labels: Vec<Label> = datum
            .dimensions
            .iter()
            .map(|d| Label::new(d.name.clone(), d.value.clone()))
            .collect();
        metrics::counter!(name, labels).increment(datum.value as u64);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutMetricRequest<'a> {
    namespace: &'a str,
    metric_data: [&'a MetricDatum; 1],
}

/// Pushes each datum as JSON to an HTTP endpoint from a background task.
pub struct HttpMetricsBackend {
    tx: mpsc::Sender<(String, MetricDatum)>,
}

impl HttpMetricsBackend {
    /// Spawn the push task. Must be called inside a Tokio runtime.
    pub fn start(config: &MetricsConfig, shutdown: &Shutdown) -> Result<Self, MetricsError> {
        let url = Url::parse(&config.push_url)
            .map_err(|e| MetricsError::Unavailable(format!("invalid push url: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| MetricsError::Unavailable(e.to_string()))?;
        let (tx, rx) = mpsc::channel(config.push_queue_capacity.max(1));

        shutdown.track(tokio::spawn(run_pushes(client, url, rx, shutdown.subscribe())));
        Ok(Self { tx })
    }
}

impl MetricsBackend for HttpMetricsBackend {
    fn put_metric(&self, namespace: &str, datum: MetricDatum) -> Result<(), MetricsError> {
        self.tx
            .try_send((namespace.to_string(), datum))
            .map_err(|e| match e {
                TrySendError::Full((_, datum)) => MetricsError::Rejected {
                    metric: datum.metric_name,
                    reason: "push queue full".to_string(),
                },
                TrySendError::Closed(_) => MetricsError::Unavailable("push task stopped".to_string()),
            })
    }
}

async fn run_pushes(
    client: reqwest::Client,
    url: Url,
    mut rx: mpsc::Receiver<(String, MetricDatum)>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some((namespace, datum)) => push(&client, &url, &namespace, &datum).await,
                None => break,
            },
            _ = shutdown.recv() => {
                while let Ok((namespace, datum)) = rx.try_recv() {
                    push(&client, &url, &namespace, &datum).await;
                }
                break;
            }
        }
    }
    tracing::info!("Metrics push task stopped");
}

async fn push(client: &reqwest::Client, url: &Url, namespace: &str, datum: &MetricDatum) {
    let body = PutMetricRequest {
        namespace,
        metric_data: [datum],
    };
    match client.post(url.clone()).json(&body).send().await {
        Ok(response) if response.status().is_success() => {
            record_metric_push("success");
            tracing::debug!(metric = %datum.metric_name, "Metric pushed");
        }
        Ok(response) => {
            record_metric_push("rejected");
            tracing::warn!(
                metric = %datum.metric_name,
                status = %response.status(),
                "Metrics backend rejected metric"
            );
        }
        Err(e) => {
            record_metric_push("failure");
            tracing::warn!(metric = %datum.metric_name, error = %e, "Failed to push metric");
        }
    }
}

/// Backend selected by configuration. `None` means metrics were never
/// initialized; the logger then skips emission and warns.
pub fn build_backend(config: &MetricsConfig, shutdown: &Shutdown) -> Option<Arc<dyn MetricsBackend>> {
    match config.backend {
        MetricsBackendKind::None => None,
        MetricsBackendKind::Recorder => Some(Arc::new(RecorderBackend)),
        MetricsBackendKind::Http => match HttpMetricsBackend::start(config, shutdown) {
            Ok(backend) => Some(Arc::new(backend)),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics backend not initialized");
                None
            }
        },
    }
}
