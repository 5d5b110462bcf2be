//! Canonical audit records.
//!
//! # Responsibilities
//! - Build the audit record of one traced operation
//! - Record it as a span with "started" and "completed" events
//! - Write one log line carrying the full record
//!
//! # Design Decisions
//! - `audit` reports failure as `false`; it never returns an error or panics
//!   on bad input
//! - Input and output are captured as JSON values so unserializable data is
//!   detected before anything is recorded

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::observability::logging::EventType;
use crate::observability::tracing::{SpanIdentity, Tracer};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize audit {field}: {source}")]
    Serialize {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Error,
    /// Response status of an audited HTTP request.
    Http(u16),
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditStatus::Success => f.write_str("success"),
            AuditStatus::Error => f.write_str("error"),
            AuditStatus::Http(code) => write!(f, "{}", code),
        }
    }
}

impl Serialize for AuditStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Everything known about one finished operation, as handed to
/// [`AuditRecorder::audit`].
#[derive(Debug, Clone)]
pub struct OperationTrace<I, O> {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub input: I,
    pub output: O,
    pub status: AuditStatus,
    pub duration: Duration,
    pub exception: Option<String>,
    /// Extra span attributes (e.g. `http.method`).
    pub attributes: BTreeMap<String, String>,
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub input: Value,
    pub output: Value,
    pub status: AuditStatus,
    pub exception_text: String,
}

impl AuditRecord {
    pub fn build<I: Serialize, O: Serialize>(trace: &OperationTrace<I, O>) -> Result<Self, AuditError> {
        let input = serde_json::to_value(&trace.input)
            .map_err(|source| AuditError::Serialize { field: "input", source })?;
        let output = serde_json::to_value(&trace.output)
            .map_err(|source| AuditError::Serialize { field: "output", source })?;

        Ok(Self {
            trace_id: trace.trace_id.clone(),
            span_id: trace.span_id.clone(),
            parent_span_id: trace.parent_span_id.clone(),
            operation_name: trace.name.clone(),
            start_time: trace.start_time,
            end_time: trace.end_time,
            duration_seconds: trace.duration.as_secs_f64(),
            input,
            output,
            status: trace.status,
            exception_text: trace.exception.clone().unwrap_or_default(),
        })
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Records audit records as spans and log lines.
#[derive(Clone)]
pub struct AuditRecorder {
    tracer: Tracer,
}

impl AuditRecorder {
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Record one finished operation. Returns `false` if the record could not
    /// be built; the failure is logged.
    pub fn audit<I: Serialize, O: Serialize>(&self, trace: OperationTrace<I, O>) -> bool {
        match self.try_audit(&trace) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    operation = %trace.name,
                    trace_id = %trace.trace_id,
                    error = %e,
                    "Failed to record audit"
                );
                false
            }
        }
    }

    fn try_audit<I: Serialize, O: Serialize>(&self, trace: &OperationTrace<I, O>) -> Result<(), AuditError> {
        let record = AuditRecord::build(trace)?;
        let line = serde_json::to_string(&record)
            .map_err(|source| AuditError::Serialize { field: "record", source })?;

        let mut span = self.tracer.start_span_in(
            record.operation_name.as_str(),
            SpanIdentity {
                trace_id: &record.trace_id,
                span_id: &record.span_id,
                parent_span_id: &record.parent_span_id,
            },
        );
        span.set_attribute("audit.trace_id", record.trace_id.as_str());
        span.set_attribute("audit.span_id", record.span_id.as_str());
        span.set_attribute("audit.parent_span_id", record.parent_span_id.as_str());
        span.set_attribute("status", record.status.to_string());
        if !record.exception_text.is_empty() {
            span.set_attribute("exception", record.exception_text.as_str());
        }
        for (key, value) in &trace.attributes {
            span.set_attribute(key.as_str(), value.as_str());
        }

        span.add_event(
            format!("{} started", record.operation_name),
            BTreeMap::from([("timestamp".to_string(), timestamp(&record.start_time))]),
        );
        span.add_event(
            format!("{} completed", record.operation_name),
            BTreeMap::from([
                ("timestamp".to_string(), timestamp(&record.end_time)),
                ("duration_in_seconds".to_string(), record.duration_seconds.to_string()),
                ("input_args".to_string(), record.input.to_string()),
                ("output_args".to_string(), record.output.to_string()),
            ]),
        );
        span.end();

        tracing::info!(
            event_type = %EventType::AuditRecord,
            trace_id = %record.trace_id,
            operation = %record.operation_name,
            status = %record.status,
            "{}",
            line
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::tracing::MemorySink;
    use serde::ser::Error as _;

    fn trace<I, O>(input: I, output: O) -> OperationTrace<I, O> {
        let now = Utc::now();
        OperationTrace {
            trace_id: "t".repeat(32),
            span_id: "span-1".to_string(),
            parent_span_id: String::new(),
            name: "create_passenger".to_string(),
            start_time: now,
            end_time: now,
            input,
            output,
            status: AuditStatus::Success,
            duration: Duration::from_millis(1500),
            exception: None,
            attributes: BTreeMap::new(),
        }
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cannot serialize"))
        }
    }

    #[test]
    fn test_status_serializes_as_string() {
        assert_eq!(serde_json::to_value(AuditStatus::Success).unwrap(), "success");
        assert_eq!(serde_json::to_value(AuditStatus::Error).unwrap(), "error");
        assert_eq!(serde_json::to_value(AuditStatus::Http(201)).unwrap(), "201");
    }

    #[test]
    fn test_audit_records_span_with_events() {
        let sink = MemorySink::new();
        let recorder = AuditRecorder::new(Tracer::new(sink.clone()));

        assert!(recorder.audit(trace(serde_json::json!({"name": "Ada"}), 42)));

        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "create_passenger");
        assert_eq!(span.attributes["status"], "success");
        assert_eq!(span.attributes["audit.span_id"], "span-1");
        assert_eq!(span.events[0].name, "create_passenger started");
        assert_eq!(span.events[1].name, "create_passenger completed");
        assert_eq!(span.events[1].attributes["duration_in_seconds"], "1.5");
        assert_eq!(span.events[1].attributes["output_args"], "42");
    }

    #[test]
    fn test_audit_span_uses_record_identity_outside_scope() {
        let sink = MemorySink::new();
        let recorder = AuditRecorder::new(Tracer::new(sink.clone()));

        let mut traced = trace((), ());
        traced.trace_id = "0af7651916cd43dd8448eb211c80319c".to_string();
        traced.span_id = "00f067aa0ba902b7".to_string();
        traced.parent_span_id = "53995c3f42cd8ad8".to_string();
        assert!(recorder.audit(traced));

        let span = &sink.spans()[0];
        assert_eq!(span.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(span.span_id, "00f067aa0ba902b7");
        assert_eq!(span.parent_span_id.as_deref(), Some("53995c3f42cd8ad8"));
    }

    #[test]
    fn test_audit_returns_false_on_unserializable_input() {
        let sink = MemorySink::new();
        let recorder = AuditRecorder::new(Tracer::new(sink.clone()));

        assert!(!recorder.audit(trace(Unserializable, ())));
        assert!(!recorder.audit(trace((), Unserializable)));
        assert!(sink.spans().is_empty());
    }

    #[test]
    fn test_record_carries_exception_text() {
        let mut failed = trace((), ());
        failed.status = AuditStatus::Error;
        failed.exception = Some("bad input".to_string());

        let record = AuditRecord::build(&failed).unwrap();
        assert_eq!(record.exception_text, "bad input");
        assert_eq!(record.duration_seconds, 1.5);
        assert_eq!(record.input, Value::Null);
    }
}
