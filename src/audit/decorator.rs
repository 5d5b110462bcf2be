//! Audit instrumentation for arbitrary operations.
//!
//! Two adapters, chosen when the operation is wrapped:
//! - [`TracedFn`] / [`AuditRecorder::trace_sync`] for direct calls
//! - [`TracedAsyncFn`] / [`AuditRecorder::trace_async`] for futures
//!
//! Both read the trace id and parent span from the request scope, time the
//! call, rotate the parent span to a fresh span id and audit the outcome.
//! The wrapped operation's `Result` is returned untouched.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::audit::record::{AuditRecorder, AuditStatus, OperationTrace};
use crate::context;
use crate::observability::tracing::new_span_id;

struct CallStart {
    trace_id: String,
    parent_span_id: String,
    start_time: DateTime<Utc>,
    started: Instant,
    input: Value,
}

impl CallStart {
    fn now<A: Serialize + ?Sized>(args: &A) -> Self {
        let args = serde_json::to_value(args)
            .unwrap_or_else(|e| Value::String(format!("<unserializable: {}>", e)));
        Self {
            trace_id: context::get_trace_id(),
            parent_span_id: context::get_parent_span(),
            start_time: Utc::now(),
            started: Instant::now(),
            input: json!({ "args": args }),
        }
    }
}

impl AuditRecorder {
    fn finish<T: Serialize, E: Display>(&self, name: &str, start: CallStart, outcome: &Result<T, E>) {
        let duration = start.started.elapsed();
        let span_id = new_span_id();
        context::rotate_parent_span(span_id.clone());

        let (output, status, exception) = match outcome {
            Ok(value) => {
                let output = serde_json::to_value(value).unwrap_or_else(|e| {
                    tracing::debug!(operation = %name, error = %e, "Operation output is not serializable");
                    Value::String(format!("<unserializable: {}>", e))
                });
                (output, AuditStatus::Success, None)
            }
            Err(e) => (Value::Null, AuditStatus::Error, Some(e.to_string())),
        };

        self.audit(OperationTrace {
            trace_id: start.trace_id,
            span_id,
            parent_span_id: start.parent_span_id,
            name: name.to_string(),
            start_time: start.start_time,
            end_time: Utc::now(),
            input: start.input,
            output,
            status,
            duration,
            exception,
            attributes: BTreeMap::new(),
        });
    }

    /// Run `f` as an audited operation named `name`.
    pub fn trace_sync<A, T, E, F>(&self, name: &str, args: &A, f: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize,
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        let start = CallStart::now(args);
        let outcome = f();
        self.finish(name, start, &outcome);
        outcome
    }

    /// Await `fut` as an audited operation named `name`.
    pub async fn trace_async<A, T, E, Fut>(&self, name: &str, args: &A, fut: Fut) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize,
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = CallStart::now(args);
        let outcome = fut.await;
        self.finish(name, start, &outcome);
        outcome
    }

    /// Wrap a synchronous operation once; every call through the wrapper is audited.
    pub fn wrap<F>(&self, name: impl Into<String>, f: F) -> TracedFn<F> {
        TracedFn {
            recorder: self.clone(),
            name: name.into(),
            f,
        }
    }

    /// Wrap an operation that returns a future.
    pub fn wrap_async<F>(&self, name: impl Into<String>, f: F) -> TracedAsyncFn<F> {
        TracedAsyncFn {
            recorder: self.clone(),
            name: name.into(),
            f,
        }
    }
}

/// Audited synchronous operation.
#[derive(Clone)]
pub struct TracedFn<F> {
    recorder: AuditRecorder,
    name: String,
    f: F,
}

impl<F> TracedFn<F> {
    pub fn call<A, T, E>(&self, args: A) -> Result<T, E>
    where
        A: Serialize,
        T: Serialize,
        E: Display,
        F: Fn(A) -> Result<T, E>,
    {
        let start = CallStart::now(&args);
        let outcome = (self.f)(args);
        self.recorder.finish(&self.name, start, &outcome);
        outcome
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Audited asynchronous operation.
#[derive(Clone)]
pub struct TracedAsyncFn<F> {
    recorder: AuditRecorder,
    name: String,
    f: F,
}

impl<F> TracedAsyncFn<F> {
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        A: Serialize,
        T: Serialize,
        E: Display,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = CallStart::now(&args);
        let outcome = (self.f)(args).await;
        self.recorder.finish(&self.name, start, &outcome);
        outcome
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestScope;
    use crate::observability::tracing::{MemorySink, Tracer};
    use std::fmt;

    #[derive(Debug, PartialEq)]
    struct ValueError(String);

    impl fmt::Display for ValueError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    fn recorder() -> (std::sync::Arc<MemorySink>, AuditRecorder) {
        let sink = MemorySink::new();
        (sink.clone(), AuditRecorder::new(Tracer::new(sink)))
    }

    #[test]
    fn test_error_is_recorded_and_returned_unchanged() {
        let (sink, recorder) = recorder();
        let parse = recorder.wrap("parse_weight", |raw: String| -> Result<f64, ValueError> {
            raw.parse::<f64>().map_err(|_| ValueError("bad input".to_string()))
        });

        let result = context::sync_scope(RequestScope::new(), || parse.call("heavy".to_string()));

        assert_eq!(result, Err(ValueError("bad input".to_string())));
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].attributes["status"], "error");
        assert!(spans[0].attributes["exception"].contains("bad input"));
    }

    #[test]
    fn test_parent_span_chain_within_request() {
        let (sink, recorder) = recorder();

        context::sync_scope(RequestScope::new(), || {
            for i in 0..3 {
                let _ = recorder.trace_sync("step", &i, || Ok::<_, ValueError>(i * 2));
            }
        });

        let spans = sink.spans();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].attributes["audit.parent_span_id"], "");
        for pair in spans.windows(2) {
            assert_eq!(
                pair[1].attributes["audit.parent_span_id"],
                pair[0].attributes["audit.span_id"]
            );
        }
        let ids: std::collections::BTreeSet<_> =
            spans.iter().map(|s| s.attributes["audit.span_id"].clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_exported_spans_link_to_previous_span() {
        let (sink, recorder) = recorder();
        let scope = RequestScope::with_trace_id("0af7651916cd43dd8448eb211c80319c");

        context::sync_scope(scope, || {
            for i in 0..3 {
                let _ = recorder.trace_sync("step", &i, || Ok::<_, ValueError>(i));
            }
        });

        let spans = sink.spans();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].parent_span_id, None);
        for pair in spans.windows(2) {
            assert_eq!(pair[1].trace_id, "0af7651916cd43dd8448eb211c80319c");
            assert_eq!(pair[1].parent_span_id.as_deref(), Some(pair[0].span_id.as_str()));
            assert_eq!(pair[0].span_id, pair[0].attributes["audit.span_id"]);
        }
    }

    struct Opaque;

    impl Serialize for Opaque {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("opaque handle"))
        }
    }

    #[test]
    fn test_unserializable_output_is_marked() {
        let (sink, recorder) = recorder();

        let result = context::sync_scope(RequestScope::new(), || {
            recorder.trace_sync("open_handle", &(), || Ok::<_, ValueError>(Opaque))
        });

        assert!(result.is_ok());
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].attributes["status"], "success");
        let output = &spans[0].events[1].attributes["output_args"];
        assert!(output.contains("<unserializable: opaque handle"));
    }

    #[tokio::test]
    async fn test_async_adapter() {
        let (sink, recorder) = recorder();
        let lookup = recorder.wrap_async("load_passenger", |id: i64| async move {
            tokio::task::yield_now().await;
            if id > 0 {
                Ok(format!("passenger-{id}"))
            } else {
                Err(ValueError("bad input".to_string()))
            }
        });

        let scope = RequestScope::with_trace_id("0af7651916cd43dd8448eb211c80319c");
        let (ok, err) = context::scope(scope, async {
            (lookup.call(7).await, lookup.call(-1).await)
        })
        .await;

        assert_eq!(ok.unwrap(), "passenger-7");
        assert_eq!(err.unwrap_err(), ValueError("bad input".to_string()));

        let spans = sink.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].attributes["status"], "success");
        assert_eq!(spans[0].attributes["audit.trace_id"], "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(spans[1].attributes["status"], "error");
        assert_eq!(
            spans[0].events[1].attributes["output_args"],
            "\"passenger-7\""
        );
    }

    #[tokio::test]
    async fn test_trace_async_outside_scope() {
        let (sink, recorder) = recorder();
        let value = recorder
            .trace_async("detached", &(), async { Ok::<_, ValueError>(1) })
            .await;
        assert_eq!(value.unwrap(), 1);
        assert_eq!(sink.spans().len(), 1);
    }
}
