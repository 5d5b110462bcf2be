//! OTLP/HTTP JSON encoding of finished spans.
//!
//! Mirrors the `ExportTraceServiceRequest` JSON mapping: camelCase keys,
//! hex-encoded ids and 64-bit nanosecond timestamps as decimal strings.

use serde::Serialize;

use crate::observability::tracing::{SpanData, SpanEvent};

const SCOPE_NAME: &str = "audit-pipeline";
const SPAN_KIND_INTERNAL: u8 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportTraceRequest {
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    pub resource: Resource,
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Serialize)]
pub struct Resource {
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
pub struct ScopeSpans {
    pub scope: InstrumentationScope,
    pub spans: Vec<Span>,
}

#[derive(Debug, Serialize)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    pub name: String,
    pub kind: u8,
    pub start_time_unix_nano: String,
    pub end_time_unix_nano: String,
    pub attributes: Vec<KeyValue>,
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub time_unix_nano: String,
    pub name: String,
    pub attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyValue {
    pub string_value: String,
}

impl KeyValue {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AnyValue {
                string_value: value.into(),
            },
        }
    }
}

fn nanos(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.timestamp_nanos_opt().unwrap_or_default().to_string()
}

fn attributes<'a>(pairs: impl IntoIterator<Item = (&'a String, &'a String)>) -> Vec<KeyValue> {
    pairs
        .into_iter()
        .map(|(k, v)| KeyValue::string(k.as_str(), v.as_str()))
        .collect()
}

impl From<&SpanEvent> for Event {
    fn from(event: &SpanEvent) -> Self {
        Self {
            time_unix_nano: nanos(&event.timestamp),
            name: event.name.clone(),
            attributes: attributes(&event.attributes),
        }
    }
}

impl From<&SpanData> for Span {
    fn from(span: &SpanData) -> Self {
        Self {
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            parent_span_id: span.parent_span_id.clone().unwrap_or_default(),
            name: span.name.clone(),
            kind: SPAN_KIND_INTERNAL,
            start_time_unix_nano: nanos(&span.start_time),
            end_time_unix_nano: nanos(&span.end_time),
            attributes: attributes(&span.attributes),
            events: span.events.iter().map(Event::from).collect(),
        }
    }
}

impl ExportTraceRequest {
    /// One resource, one scope, all spans of the batch.
    pub fn from_spans(service_name: &str, spans: &[SpanData]) -> Self {
        Self {
            resource_spans: vec![ResourceSpans {
                resource: Resource {
                    attributes: vec![KeyValue::string("service.name", service_name)],
                },
                scope_spans: vec![ScopeSpans {
                    scope: InstrumentationScope {
                        name: SCOPE_NAME.to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                    spans: spans.iter().map(Span::from).collect(),
                }],
            }],
        }
    }
}
