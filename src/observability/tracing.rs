//! Span recording and collector selection.
//!
//! # Responsibilities
//! - Open spans as scoped handles that record themselves on every exit path
//! - Pick the span destination at startup: local sink, first constructible
//!   collector, or local fallback
//! - Batch spans toward the collector off the request path
//! - Degrade to local recording when a batch cannot reach the collector
//!
//! # Design Decisions
//! - Sinks are append-only and shared by every request (`Send + Sync`)
//! - `record` never blocks; a full queue drops the span and counts it
//! - Trace ids follow W3C TraceContext (32 hex chars); the request's
//!   correlation trace id is reused when it already has that shape

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::config::TracingConfig;
use crate::context;
use crate::lifecycle::Shutdown;
use crate::observability::exporter::{ExportResult, ExporterFactory, GracefulExporter, SpanExporter};
use crate::observability::metrics;

/// Destination name reported by the local sink.
pub const LOCAL_DESTINATION: &str = "local";

/// A timestamped annotation inside a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

/// A closed span. Immutable once handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanData {
    pub name: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    pub events: Vec<SpanEvent>,
}

/// 128-bit random trace id, lowercase hex.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 64-bit random span id, lowercase hex.
pub fn new_span_id() -> String {
    format!("{:016x}", rand::random::<u64>().max(1))
}

/// Whether `id` is a non-zero 32-char lowercase hex trace id.
pub fn is_valid_trace_id(id: &str) -> bool {
    id.len() == 32
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && id.bytes().any(|b| b != b'0')
}

/// Whether `id` is a non-zero 16-char lowercase hex span id.
pub fn is_valid_span_id(id: &str) -> bool {
    id.len() == 16
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && id.bytes().any(|b| b != b'0')
}

/// Identity a span is exported under. Ids that are not valid W3C ids are
/// replaced: the trace id by the request's (or a fresh one), the span id by
/// a fresh one, the parent by none.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanIdentity<'a> {
    pub trace_id: &'a str,
    pub span_id: &'a str,
    pub parent_span_id: &'a str,
}

/// Where closed spans go.
pub trait SpanSink: Send + Sync {
    fn destination(&self) -> &str;

    /// Accept a closed span. Must not block or fail.
    fn record(&self, span: SpanData);
}

/// Console-level sink: spans become debug log lines and go nowhere else.
#[derive(Debug, Default)]
pub struct LocalSink;

impl SpanSink for LocalSink {
    fn destination(&self) -> &str {
        LOCAL_DESTINATION
    }

    fn record(&self, span: SpanData) {
        tracing::debug!(
            span = %span.name,
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            events = span.events.len(),
            "Span recorded locally"
        );
    }
}

/// Keeps every span in memory; for inspection and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    spans: Mutex<Vec<SpanData>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy of everything recorded so far.
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SpanSink for MemorySink {
    fn destination(&self) -> &str {
        "memory"
    }

    fn record(&self, span: SpanData) {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).push(span);
    }
}

/// Queues spans for a background task that exports them in batches.
pub struct BatchSink {
    destination: String,
    tx: mpsc::Sender<SpanData>,
}

impl BatchSink {
    /// Spawn the batch task. Must be called inside a Tokio runtime.
    pub fn start(
        exporter: Arc<dyn SpanExporter>,
        config: &TracingConfig,
        shutdown: &Shutdown,
    ) -> Self {
        let destination = exporter.destination().to_string();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let exporter = GracefulExporter::new(
            exporter,
            Duration::from_secs(config.export_timeout_secs),
        );

        shutdown.track(tokio::spawn(run_batches(
            exporter,
            rx,
            config.batch_size.max(1),
            Duration::from_millis(config.flush_interval_ms.max(1)),
            shutdown.subscribe(),
        )));

        Self { destination, tx }
    }
}

impl SpanSink for BatchSink {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn record(&self, span: SpanData) {
        match self.tx.try_send(span) {
            Ok(()) => {}
            Err(TrySendError::Full(span)) => {
                metrics::record_span_dropped();
                tracing::warn!(
                    destination = %self.destination,
                    span = %span.name,
                    "Span queue full, dropping span"
                );
            }
            Err(TrySendError::Closed(span)) => LocalSink.record(span),
        }
    }
}

async fn run_batches(
    exporter: GracefulExporter,
    mut rx: mpsc::Receiver<SpanData>,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + flush_interval, flush_interval);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(span) => {
                    batch.push(span);
                    if batch.len() >= batch_size {
                        flush(&exporter, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => flush(&exporter, &mut batch).await,
            _ = shutdown.recv() => {
                while let Ok(span) = rx.try_recv() {
                    batch.push(span);
                }
                break;
            }
        }
    }

    flush(&exporter, &mut batch).await;
    tracing::info!(destination = %exporter.destination(), "Span batch task stopped");
}

async fn flush(exporter: &GracefulExporter, batch: &mut Vec<SpanData>) {
    if batch.is_empty() {
        return;
    }
    let spans = std::mem::take(batch);
    match exporter.export(&spans).await {
        Ok(ExportResult::Success) => {}
        Ok(ExportResult::Failure) => {
            // Keep the failed batch observable locally.
            for span in spans {
                LocalSink.record(span);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, dropped = spans.len(), "Span batch discarded after exporter defect");
        }
    }
}

/// Process-wide span entry point.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn SpanSink>,
}

impl Tracer {
    pub fn new(sink: Arc<dyn SpanSink>) -> Self {
        Self { sink }
    }

    /// Tracer that only records locally.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalSink))
    }

    /// Select a destination from configuration.
    ///
    /// "local" installs the local sink directly. Otherwise each candidate host
    /// is handed to `factory` in order and the first exporter built wins;
    /// construction failures are logged and skipped. With no usable candidate
    /// the local sink is installed, so startup never fails here.
    pub async fn from_config(
        config: &TracingConfig,
        factory: &dyn ExporterFactory,
        shutdown: &Shutdown,
    ) -> Self {
        if config.is_local() {
            tracing::info!("Using local span sink");
            return Self::local();
        }

        for host in config.candidates() {
            tracing::info!(host = %host, "Trying collector host for telemetry");
            match factory.build(&host, config).await {
                Ok(exporter) => {
                    tracing::info!(destination = %exporter.destination(), "Span collector selected");
                    let sink = BatchSink::start(exporter, config, shutdown);
                    return Self::new(Arc::new(sink));
                }
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Collector exporter unavailable, trying next candidate");
                }
            }
        }

        tracing::warn!(
            candidates = %config.collector_hosts,
            "No span collector usable, falling back to local span sink"
        );
        Self::local()
    }

    pub fn destination(&self) -> &str {
        self.sink.destination()
    }

    /// Open a span in the current request: its trace id, and the scope's
    /// parent span as OTLP parent. The span is recorded when the handle is
    /// ended or dropped.
    pub fn start_span(&self, name: impl Into<String>) -> SpanHandle {
        let trace_id = context::get_trace_id();
        let parent_span_id = context::get_parent_span();
        self.start_span_in(
            name,
            SpanIdentity {
                trace_id: &trace_id,
                span_id: "",
                parent_span_id: &parent_span_id,
            },
        )
    }

    /// Open a span under an explicit identity, e.g. one carried by an audit
    /// record produced outside the request scope.
    pub fn start_span_in(&self, name: impl Into<String>, identity: SpanIdentity<'_>) -> SpanHandle {
        let trace_id = if is_valid_trace_id(identity.trace_id) {
            identity.trace_id.to_string()
        } else {
            let scoped = context::get_trace_id();
            if is_valid_trace_id(&scoped) {
                scoped
            } else {
                new_trace_id()
            }
        };
        let span_id = if is_valid_span_id(identity.span_id) {
            identity.span_id.to_string()
        } else {
            new_span_id()
        };
        let parent_span_id = is_valid_span_id(identity.parent_span_id)
            .then(|| identity.parent_span_id.to_string());

        SpanHandle {
            data: Some(SpanData {
                name: name.into(),
                trace_id,
                span_id,
                parent_span_id,
                start_time: Utc::now(),
                end_time: Utc::now(),
                attributes: BTreeMap::new(),
                events: Vec::new(),
            }),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Attach an event to an open span.
    pub fn add_event(
        span: &mut SpanHandle,
        name: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) {
        span.add_event(name, attributes);
    }
}

/// An open span. Dropping it closes and records it.
pub struct SpanHandle {
    data: Option<SpanData>,
    sink: Arc<dyn SpanSink>,
}

impl SpanHandle {
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(data) = self.data.as_mut() {
            data.attributes.insert(key.into(), value.into());
        }
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: BTreeMap<String, String>) {
        if let Some(data) = self.data.as_mut() {
            data.events.push(SpanEvent {
                name: name.into(),
                timestamp: Utc::now(),
                attributes,
            });
        }
    }

    pub fn span_id(&self) -> &str {
        self.data.as_ref().map(|d| d.span_id.as_str()).unwrap_or_default()
    }

    /// Close the span now.
    pub fn end(self) {}
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        if let Some(mut data) = self.data.take() {
            data.end_time = Utc::now();
            self.sink.record(data);
        }
    }
}
