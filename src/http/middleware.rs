//! Request entry middleware.
//!
//! Opens the correlation scope for each request, runs the rest of the stack
//! inside it and, on exit, records the top-level audit of the request.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::json;

use crate::audit::record::{AuditRecorder, AuditStatus, OperationTrace};
use crate::context::{self, RequestScope};
use crate::observability::tracing::{is_valid_trace_id, new_span_id, new_trace_id};

/// Incoming trace id, honored when it is a valid 32-hex id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// Trace id echoed on every response.
pub const TRACE_ID_RESPONSE_HEADER: &str = "trace-id";
/// Calling user, carried as the actor id.
pub const ACTOR_ID_HEADER: &str = "x-system-user-id";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Every header except authorization, as strings.
fn header_snapshot(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| *name != AUTHORIZATION)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

pub async fn correlation_middleware(
    State(recorder): State<AuditRecorder>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let headers = request.headers();
    let trace_id = header_str(headers, TRACE_ID_HEADER)
        .filter(|id| is_valid_trace_id(id))
        .map(str::to_string)
        .unwrap_or_else(new_trace_id);
    let authorization = header_str(headers, AUTHORIZATION.as_str())
        .unwrap_or_default()
        .to_string();
    let actor_id = header_str(headers, ACTOR_ID_HEADER).map(str::to_string);
    let snapshot = header_snapshot(headers);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let scope = RequestScope::with_trace_id(trace_id.clone());
    context::scope(scope, async move {
        context::set_authorization(authorization);
        context::set_headers(snapshot);
        if let Some(actor) = actor_id {
            context::set_actor_id(actor);
        }

        tracing::info!(trace_id = %trace_id, method = %method, path = %path, "API endpoint called");
        let start_time = Utc::now();
        let started = Instant::now();

        let mut response = next.run(request).await;

        let status = response.status().as_u16();
        let duration = started.elapsed();
        let span_id = new_span_id();
        let parent_span_id = context::rotate_parent_span(span_id.clone());

        recorder.audit(OperationTrace {
            trace_id: trace_id.clone(),
            span_id,
            parent_span_id,
            name: path.clone(),
            start_time,
            end_time: Utc::now(),
            input: json!({ "method": method, "path": path }),
            output: json!({ "status_code": status }),
            status: AuditStatus::Http(status),
            duration,
            exception: None,
            attributes: BTreeMap::from([
                ("http.method".to_string(), method.clone()),
                ("http.path".to_string(), path.clone()),
                ("http.status_code".to_string(), status.to_string()),
            ]),
        });

        tracing::info!(
            trace_id = %trace_id,
            status = status,
            duration_ms = duration.as_millis() as u64,
            "Response status code"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert(TRACE_ID_RESPONSE_HEADER, value);
        }
        response
    })
    .await
}
