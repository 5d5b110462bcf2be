//! Span exporters and their construction.
//!
//! # Responsibilities
//! - Send finished span batches to an OTLP/HTTP collector
//! - Build an exporter per candidate collector host, rejecting hosts that
//!   cannot be addressed or reached at startup
//! - Separate transient network failures from defects at export time
//!
//! # Design Decisions
//! - Transient failures (timeout, connection) and collector rejections are a
//!   soft `ExportResult::Failure`; nothing is raised to the span producer
//! - Any other error is logged and returned, it points at a bug
//! - Exporters are async trait objects so the batch task can own any of them

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use url::Url;

use crate::config::TracingConfig;
use crate::observability::metrics;
use crate::observability::otlp::ExportTraceRequest;
use crate::observability::tracing::SpanData;

/// Errors raised while building or using an exporter.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Candidate host does not form a valid collector URL.
    #[error("invalid collector endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Startup probe could not reach the collector.
    #[error("collector unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// Timeout or connection failure on an established exporter.
    #[error("transient export failure: {0}")]
    Transient(String),

    /// Collector answered with a non-success status.
    #[error("collector rejected batch with status {0}")]
    Rejected(u16),

    /// Anything else; indicates a defect rather than a network condition.
    #[error("span export defect: {0}")]
    Defect(String),
}

impl ExportError {
    /// Whether the failure is an expected network condition.
    pub fn is_soft(&self) -> bool {
        matches!(self, ExportError::Transient(_) | ExportError::Rejected(_))
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ExportError::Transient(e.to_string())
        } else {
            ExportError::Defect(e.to_string())
        }
    }
}

/// Outcome reported to the batch processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    Success,
    Failure,
}

/// A destination for finished span batches.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Human-readable destination, used in logs.
    fn destination(&self) -> &str;

    /// Export one batch.
    async fn export(&self, batch: &[SpanData]) -> Result<(), ExportError>;
}

/// Builds an exporter bound to one candidate collector host.
#[async_trait]
pub trait ExporterFactory: Send + Sync {
    async fn build(
        &self,
        host: &str,
        config: &TracingConfig,
    ) -> Result<Arc<dyn SpanExporter>, ExportError>;
}

/// OTLP/HTTP JSON exporter.
pub struct OtlpHttpExporter {
    endpoint: Url,
    service_name: String,
    client: reqwest::Client,
}

impl OtlpHttpExporter {
    pub fn new(endpoint: Url, service_name: &str, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            endpoint,
            service_name: service_name.to_string(),
            client,
        })
    }
}

#[async_trait]
impl SpanExporter for OtlpHttpExporter {
    fn destination(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        let body = ExportTraceRequest::from_spans(&self.service_name, batch);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Rejected(status.as_u16()))
        }
    }
}

/// Builds [`OtlpHttpExporter`]s, optionally probing the collector port first.
pub struct OtlpHttpFactory {
    service_name: String,
    probe_timeout: Option<Duration>,
}

impl OtlpHttpFactory {
    pub fn new(service_name: impl Into<String>, config: &TracingConfig) -> Self {
        Self {
            service_name: service_name.into(),
            probe_timeout: config
                .probe_on_startup
                .then(|| Duration::from_millis(config.probe_timeout_ms)),
        }
    }
}

/// `http://<host>:<port><path>` for a candidate host.
pub fn collector_url(host: &str, config: &TracingConfig) -> Result<Url, ExportError> {
    let raw = format!("http://{}:{}{}", host, config.collector_port, config.collector_path);
    let invalid = |reason: String| ExportError::InvalidEndpoint {
        endpoint: raw.clone(),
        reason,
    };

    if host.is_empty() || host.contains(|c: char| c.is_whitespace() || "/?#@".contains(c)) {
        return Err(invalid(format!("'{}' is not a host name or address", host)));
    }
    Url::parse(&raw).map_err(|e| invalid(e.to_string()))
}

#[async_trait]
impl ExporterFactory for OtlpHttpFactory {
    async fn build(
        &self,
        host: &str,
        config: &TracingConfig,
    ) -> Result<Arc<dyn SpanExporter>, ExportError> {
        let url = collector_url(host, config)?;

        if let Some(limit) = self.probe_timeout {
            let target = (host, config.collector_port);
            match tokio::time::timeout(limit, TcpStream::connect(target)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    return Err(ExportError::Unreachable {
                        endpoint: url.to_string(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(ExportError::Unreachable {
                        endpoint: url.to_string(),
                        reason: format!("no answer within {:?}", limit),
                    })
                }
            }
        }

        let exporter = OtlpHttpExporter::new(
            url,
            &self.service_name,
            Duration::from_secs(config.export_timeout_secs),
        )?;
        Ok(Arc::new(exporter))
    }
}

/// Wraps an exporter so transient failures never escape.
pub struct GracefulExporter {
    inner: Arc<dyn SpanExporter>,
    timeout: Duration,
}

impl GracefulExporter {
    pub fn new(inner: Arc<dyn SpanExporter>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn destination(&self) -> &str {
        self.inner.destination()
    }

    /// Export a batch. Soft failures come back as `Ok(ExportResult::Failure)`;
    /// defects are logged and returned.
    pub async fn export(&self, batch: &[SpanData]) -> Result<ExportResult, ExportError> {
        let outcome = match tokio::time::timeout(self.timeout, self.inner.export(batch)).await {
            Ok(result) => result,
            Err(_) => Err(ExportError::Transient(format!(
                "export did not finish within {:?}",
                self.timeout
            ))),
        };

        match outcome {
            Ok(()) => {
                metrics::record_span_export("success", batch.len());
                Ok(ExportResult::Success)
            }
            Err(e) if e.is_soft() => {
                tracing::error!(
                    destination = %self.inner.destination(),
                    error = %e,
                    spans = ?batch,
                    "Error connecting to span collector"
                );
                metrics::record_span_export("failure", batch.len());
                Ok(ExportResult::Failure)
            }
            Err(e) => {
                tracing::error!(
                    destination = %self.inner.destination(),
                    error = %e,
                    "Span export failed with unexpected error"
                );
                metrics::record_span_export("defect", batch.len());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        error: fn() -> Option<ExportError>,
        delay: Duration,
    }

    #[async_trait]
    impl SpanExporter for Scripted {
        fn destination(&self) -> &str {
            "scripted"
        }

        async fn export(&self, _batch: &[SpanData]) -> Result<(), ExportError> {
            tokio::time::sleep(self.delay).await;
            match (self.error)() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn graceful(error: fn() -> Option<ExportError>, delay: Duration) -> GracefulExporter {
        GracefulExporter::new(Arc::new(Scripted { error, delay }), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_transient_failure_is_soft() {
        let exporter = graceful(|| Some(ExportError::Transient("reset".into())), Duration::ZERO);
        assert_eq!(exporter.export(&[]).await.unwrap(), ExportResult::Failure);

        let exporter = graceful(|| Some(ExportError::Rejected(503)), Duration::ZERO);
        assert_eq!(exporter.export(&[]).await.unwrap(), ExportResult::Failure);
    }

    #[tokio::test]
    async fn test_timeout_is_soft() {
        let exporter = graceful(|| None, Duration::from_secs(5));
        assert_eq!(exporter.export(&[]).await.unwrap(), ExportResult::Failure);
    }

    #[tokio::test]
    async fn test_defect_is_returned() {
        let exporter = graceful(|| Some(ExportError::Defect("bad state".into())), Duration::ZERO);
        assert!(matches!(exporter.export(&[]).await, Err(ExportError::Defect(_))));
    }

    #[tokio::test]
    async fn test_success() {
        let exporter = graceful(|| None, Duration::ZERO);
        assert_eq!(exporter.export(&[]).await.unwrap(), ExportResult::Success);
    }

    #[test]
    fn test_collector_url() {
        let config = TracingConfig::default();
        let url = collector_url("10.1.2.3", &config).unwrap();
        assert_eq!(url.as_str(), "http://10.1.2.3:4316/v1/traces");
        assert!(collector_url("bad host", &config).is_err());
        assert!(collector_url("", &config).is_err());
    }

    #[tokio::test]
    async fn test_factory_rejects_unreachable_host() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TracingConfig {
            collector_port: port,
            ..TracingConfig::default()
        };
        let factory = OtlpHttpFactory::new("svc", &config);
        let result = factory.build("127.0.0.1", &config).await;
        assert!(matches!(result, Err(ExportError::Unreachable { .. })));
    }
}
