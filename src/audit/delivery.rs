//! Fire-and-forget delivery of audit payloads to the external audit service.
//!
//! # Responsibilities
//! - Accept payloads from synchronous code without blocking it
//! - POST each payload with the caller's bearer token
//! - Interpret the service's answer and log it; nothing is retried
//!
//! # Design Decisions
//! - A bounded queue feeds a dispatcher task; at most `workers` deliveries
//!   are in flight at once
//! - A full queue drops the payload, logs and counts it
//! - In-flight deliveries run to completion independently of the request
//!   that produced them, so arrival order is not guaranteed

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use url::Url;

use crate::config::AuditConfig;
use crate::observability::logging::EventType;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid audit service url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build audit client: {0}")]
    Client(String),

    #[error("audit service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Body posted to the audit service for one entity change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditPayload {
    pub correlation_id: String,
    pub system_id: String,
    pub entity_type: String,
    pub operation: String,
    pub before: BTreeMap<String, String>,
    pub after: BTreeMap<String, String>,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Anything that accepts audit payloads for delivery.
pub trait AuditSink: Send + Sync {
    /// Hand off `payload`. Returns immediately and never fails.
    fn dispatch(&self, payload: AuditPayload, authorization: &str);
}

/// How the audit service answered one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// 201 with the created record.
    Created(serde_json::Value),
    /// 400 with the service's error body.
    ClientError(String),
    /// Any other status.
    Unexpected(u16),
}

#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    rejected: AtomicU64,
    unexpected: AtomicU64,
    transport_errors: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub delivered: u64,
    pub rejected: u64,
    pub unexpected: u64,
    pub transport_errors: u64,
    pub dropped: u64,
}

impl DeliverySnapshot {
    /// Deliveries that reached a final state, plus drops.
    pub fn total(&self) -> u64 {
        self.delivered + self.rejected + self.unexpected + self.transport_errors + self.dropped
    }
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unexpected: self.unexpected.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// `Bearer <token>` unless the caller already sent a scheme.
fn bearer(authorization: &str) -> String {
    if authorization.starts_with("Bearer ") || authorization.starts_with("bearer ") {
        authorization.to_string()
    } else {
        format!("Bearer {}", authorization)
    }
}

struct Job {
    payload: AuditPayload,
    authorization: String,
}

/// Performs one outbound call per payload.
pub struct DeliveryWorker {
    client: reqwest::Client,
    url: Url,
}

impl DeliveryWorker {
    pub fn new(config: &AuditConfig) -> Result<Self, DeliveryError> {
        let raw = config.record_url();
        let url = Url::parse(&raw).map_err(|e| DeliveryError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self { client, url })
    }

    /// POST one payload and classify the answer.
    pub async fn deliver(
        &self,
        payload: &AuditPayload,
        authorization: &str,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let mut request = self.client.post(self.url.clone()).json(payload);
        if !authorization.is_empty() {
            request = request.header(AUTHORIZATION, bearer(authorization));
        }
        let response = request.send().await?;

        let outcome = match response.status() {
            StatusCode::CREATED => {
                DeliveryOutcome::Created(response.json().await.unwrap_or(serde_json::Value::Null))
            }
            StatusCode::BAD_REQUEST => DeliveryOutcome::ClientError(response.text().await.unwrap_or_default()),
            other => DeliveryOutcome::Unexpected(other.as_u16()),
        };
        Ok(outcome)
    }

    async fn handle(&self, job: Job, stats: &DeliveryStats) {
        let correlation_id = job.payload.correlation_id.as_str();
        match self.deliver(&job.payload, &job.authorization).await {
            Ok(DeliveryOutcome::Created(record)) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                metrics::record_delivery("created");
                tracing::info!(correlation_id = %correlation_id, record = %record, "Audit record created");
            }
            Ok(DeliveryOutcome::ClientError(body)) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_delivery("rejected");
                tracing::error!(
                    event_type = %EventType::AuditDeliveryError,
                    correlation_id = %correlation_id,
                    body = %body,
                    "Audit service rejected record"
                );
            }
            Ok(DeliveryOutcome::Unexpected(status)) => {
                stats.unexpected.fetch_add(1, Ordering::Relaxed);
                metrics::record_delivery("unexpected");
                tracing::warn!(
                    correlation_id = %correlation_id,
                    status = status,
                    "Unexpected status code from audit service"
                );
            }
            Err(e) => {
                stats.transport_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_delivery("transport_error");
                tracing::error!(
                    event_type = %EventType::AuditDeliveryError,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Audit delivery failed"
                );
            }
        }
    }
}

/// Non-blocking front of the delivery pipeline.
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::Sender<Job>,
    stats: Arc<DeliveryStats>,
}

impl AuditDispatcher {
    /// Spawn the dispatcher task. Must be called inside a Tokio runtime.
    pub fn start(config: &AuditConfig) -> Result<Self, DeliveryError> {
        let worker = Arc::new(DeliveryWorker::new(config)?);
        let stats = Arc::new(DeliveryStats::default());
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));

        tokio::spawn(run_dispatcher(worker, rx, permits, stats.clone()));
        tracing::info!(
            url = %config.record_url(),
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Audit dispatcher started"
        );

        Ok(Self { tx, stats })
    }

    pub fn stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }
}

impl AuditSink for AuditDispatcher {
    fn dispatch(&self, payload: AuditPayload, authorization: &str) {
        let job = Job {
            payload,
            authorization: authorization.to_string(),
        };
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_dispatch_dropped();
                tracing::warn!(
                    correlation_id = %job.payload.correlation_id,
                    entity_type = %job.payload.entity_type,
                    "Audit queue unavailable, dropping record"
                );
            }
        }
    }
}

async fn run_dispatcher(
    worker: Arc<DeliveryWorker>,
    mut rx: mpsc::Receiver<Job>,
    permits: Arc<Semaphore>,
    stats: Arc<DeliveryStats>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let worker = worker.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            worker.handle(job, &stats).await;
            drop(permit);
        });
    }
    tracing::info!("Audit dispatcher stopped");
}
