//! Structured logging.
//!
//! # Responsibilities
//! - Attach event type, actor and entity ids to every log line
//! - Format one human and machine parseable line per call
//! - Forward error and critical counts to the metrics backend
//!
//! # Design Decisions
//! - Lines are emitted through `tracing`, so filtering and output follow the
//!   installed subscriber
//! - `tracing` has no CRITICAL level: critical lines are ERROR with
//!   `severity = "CRITICAL"`
//! - Metric push failures become a warning and never reach the caller

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};

use crate::context;
use crate::observability::metrics::{self, MetricDatum, MetricsBackend};

/// Categorizes log entries and error metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ApiRequest,
    ApiResponse,
    ApiError,
    DbQuery,
    DbError,
    ValidationError,
    BusinessLogicError,
    AuditRecord,
    AuditDeliveryError,
    MetricPushSuccess,
    MetricPushError,
    /// Service-specific event, written as given.
    Custom(String),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::ApiRequest => "API_REQUEST",
            EventType::ApiResponse => "API_RESPONSE",
            EventType::ApiError => "API_ERROR",
            EventType::DbQuery => "DB_QUERY",
            EventType::DbError => "DB_ERROR",
            EventType::ValidationError => "VALIDATION_ERROR",
            EventType::BusinessLogicError => "BUSINESS_LOGIC_ERROR",
            EventType::AuditRecord => "AUDIT_RECORD",
            EventType::AuditDeliveryError => "AUDIT_DELIVERY_ERROR",
            EventType::MetricPushSuccess => "METRIC_PUSH_SUCCESS",
            EventType::MetricPushError => "METRIC_PUSH_ERROR",
            EventType::Custom(name) => name,
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Everything one log call carries.
#[derive(Debug, Clone, PartialEq)]
pub struct LogContext {
    pub timestamp: String,
    pub event_type: EventType,
    pub message: String,
    pub actor_id: Option<String>,
    pub entity_id: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            event_type,
            message: message.into(),
            actor_id: None,
            entity_id: None,
            extra: BTreeMap::new(),
        }
    }

    /// `timestamp | EVENT | message  | actor_id=.. | entity_id=.. | k=v`
    pub fn format_line(&self) -> String {
        let mut parts = vec![format!(
            "{} | {} | {} ",
            self.timestamp, self.event_type, self.message
        )];
        if let Some(actor) = &self.actor_id {
            parts.push(format!("actor_id={}", actor));
        }
        if let Some(entity) = &self.entity_id {
            parts.push(format!("entity_id={}", entity));
        }
        for (key, value) in &self.extra {
            parts.push(format!("{}={}", key, value));
        }
        parts.join(" | ")
    }
}

/// Last path segment of a type name, without generics.
fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Name of the concrete error type. Trait objects have no useful static
/// name, so their `Debug` output's leading identifier is used instead.
fn error_type_name<E: StdError + ?Sized>(error: &E) -> String {
    if !std::any::type_name::<E>().starts_with("dyn ") {
        return short_type_name::<E>().to_string();
    }
    let debug = format!("{:?}", error);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

/// Typed logger shared by the whole service.
pub struct StructuredLogger {
    namespace: String,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl StructuredLogger {
    /// `backend = None` means metrics were never initialized.
    pub fn new(namespace: impl Into<String>, backend: Option<Arc<dyn MetricsBackend>>) -> Self {
        Self {
            namespace: namespace.into(),
            backend,
        }
    }

    pub fn debug(&self, event_type: EventType, message: impl Into<String>) -> LogEvent<'_> {
        self.event(Severity::Debug, event_type, message)
    }

    pub fn info(&self, event_type: EventType, message: impl Into<String>) -> LogEvent<'_> {
        self.event(Severity::Info, event_type, message)
    }

    pub fn warning(&self, event_type: EventType, message: impl Into<String>) -> LogEvent<'_> {
        self.event(Severity::Warning, event_type, message)
    }

    /// Error line plus one `APIError` count unless suppressed.
    pub fn error(&self, event_type: EventType, message: impl Into<String>) -> LogEvent<'_> {
        self.event(Severity::Error, event_type, message)
    }

    /// Critical line plus one `CriticalError` count unless suppressed.
    pub fn critical(&self, event_type: EventType, message: impl Into<String>) -> LogEvent<'_> {
        self.event(Severity::Critical, event_type, message)
    }

    fn event(&self, severity: Severity, event_type: EventType, message: impl Into<String>) -> LogEvent<'_> {
        let mut context = LogContext::new(event_type, message);
        let actor = context::get_actor_id();
        if !actor.is_empty() {
            context.actor_id = Some(actor);
        }
        LogEvent {
            logger: self,
            severity,
            context,
            push_metric: true,
        }
    }

    fn push_metric(&self, metric_name: &str, context: &LogContext, critical: bool) {
        let Some(backend) = &self.backend else {
            tracing::warn!(
                event_type = %EventType::MetricPushError,
                metric = metric_name,
                "Metrics backend is not initialized, skipping metric"
            );
            return;
        };

        let mut dimensions = vec![("EventType".to_string(), context.event_type.to_string())];
        if let Some(actor) = &context.actor_id {
            dimensions.push(("UserID".to_string(), actor.clone()));
        }
        if critical {
            dimensions.push(("Severity".to_string(), "Critical".to_string()));
        }

        match backend.put_metric(&self.namespace, MetricDatum::count(metric_name, 1.0, dimensions)) {
            Ok(()) => {
                tracing::debug!(
                    event_type = %EventType::MetricPushSuccess,
                    metric = metric_name,
                    "Metric pushed"
                );
            }
            Err(e) => {
                metrics::record_metric_push("failure");
                tracing::warn!(
                    event_type = %EventType::MetricPushError,
                    metric = metric_name,
                    error = %e,
                    "Failed to push metric: {}",
                    e
                );
            }
        }
    }
}

/// A log call under construction; nothing is written until [`LogEvent::emit`].
#[must_use = "log events are written only by emit()"]
pub struct LogEvent<'a> {
    logger: &'a StructuredLogger,
    severity: Severity,
    context: LogContext,
    push_metric: bool,
}

impl<'a> LogEvent<'a> {
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.context.actor_id = Some(actor_id.into());
        self
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.context.entity_id = Some(entity_id.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.extra.insert(key.into(), value.to_string());
        self
    }

    /// Attach error type, message and source chain. An earlier
    /// [`LogEvent::error_type`] wins over the derived type name.
    pub fn error<E: StdError + ?Sized>(mut self, error: &E) -> Self {
        let extra = &mut self.context.extra;
        extra
            .entry("error_type".to_string())
            .or_insert_with(|| error_type_name(error));
        extra.insert("error_message".to_string(), error.to_string());

        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        if !chain.is_empty() {
            extra.insert("stack_trace".to_string(), chain.join(" <- "));
        }
        self
    }

    /// Set the logged error type explicitly.
    pub fn error_type(mut self, name: impl Into<String>) -> Self {
        self.context.extra.insert("error_type".to_string(), name.into());
        self
    }

    /// Skip the error metric for this call.
    pub fn no_metric(mut self) -> Self {
        self.push_metric = false;
        self
    }

    /// Write the line and, for error and critical, push the metric.
    pub fn emit(self) -> LogContext {
        let line = self.context.format_line();
        let event_type = &self.context.event_type;

        match self.severity {
            Severity::Debug => tracing::debug!(event_type = %event_type, "{}", line),
            Severity::Info => tracing::info!(event_type = %event_type, "{}", line),
            Severity::Warning => tracing::warn!(event_type = %event_type, "{}", line),
            Severity::Error => tracing::error!(event_type = %event_type, "{}", line),
            Severity::Critical => {
                tracing::error!(event_type = %event_type, severity = "CRITICAL", "{}", line)
            }
        }

        if self.push_metric {
            match self.severity {
                Severity::Error => self.logger.push_metric("APIError", &self.context, false),
                Severity::Critical => self.logger.push_metric("CriticalError", &self.context, true),
                _ => {}
            }
        }
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::MetricsError;
    use std::sync::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(Level, String)>>>);

    impl Captured {
        fn at(&self, level: Level) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), visitor.0));
        }
    }

    fn capture<R>(f: impl FnOnce() -> R) -> (Captured, R) {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        let result = tracing::subscriber::with_default(subscriber, f);
        (captured, result)
    }

    #[derive(Default)]
    struct Stub {
        fail: bool,
        sent: Mutex<Vec<MetricDatum>>,
    }

    impl MetricsBackend for Stub {
        fn put_metric(&self, _namespace: &str, datum: MetricDatum) -> Result<(), MetricsError> {
            self.sent.lock().unwrap().push(datum);
            if self.fail {
                Err(MetricsError::Unavailable("endpoint down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct TimeoutError;

    impl fmt::Display for TimeoutError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("query timed out")
        }
    }

    impl StdError for TimeoutError {}

    #[test]
    fn test_event_type_names() {
        assert_eq!(EventType::DbError.to_string(), "DB_ERROR");
        assert_eq!(EventType::MetricPushError.to_string(), "METRIC_PUSH_ERROR");
        assert_eq!(EventType::Custom("CREATE_PASSENGER".into()).to_string(), "CREATE_PASSENGER");
    }

    #[test]
    fn test_format_line() {
        let mut context = LogContext::new(EventType::ApiRequest, "hello");
        context.timestamp = "2024-01-01T00:00:00Z".to_string();
        context.actor_id = Some("u1".to_string());
        context.extra.insert("path".to_string(), "/x".to_string());
        assert_eq!(
            context.format_line(),
            "2024-01-01T00:00:00Z | API_REQUEST | hello  | actor_id=u1 | path=/x"
        );
        assert!(LogContext::new(EventType::ApiRequest, "x").timestamp.ends_with('Z'));
    }

    #[test]
    fn test_error_pushes_one_metric() {
        let backend = Arc::new(Stub::default());
        let logger = StructuredLogger::new("ns", Some(backend.clone()));

        let (captured, context) = capture(|| {
            logger
                .error(EventType::DbError, "db timeout")
                .actor("u7")
                .error(&TimeoutError)
                .emit()
        });

        let errors = captured.at(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("error_type=TimeoutError"));
        assert!(errors[0].contains("error_message=query timed out"));
        assert_eq!(context.extra["error_type"], "TimeoutError");

        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].metric_name, "APIError");
        assert_eq!(sent[0].dimension("EventType"), Some("DB_ERROR"));
        assert_eq!(sent[0].dimension("UserID"), Some("u7"));
        assert_eq!(sent[0].dimension("Severity"), None);
    }

    #[test]
    fn test_boxed_error_logs_concrete_type() {
        let logger = StructuredLogger::new("ns", None);
        let boxed: Box<dyn StdError + Send + Sync> = Box::new(TimeoutError);

        let context = logger
            .warning(EventType::DbError, "retrying")
            .error(boxed.as_ref())
            .emit();
        assert_eq!(context.extra["error_type"], "TimeoutError");
        assert_eq!(context.extra["error_message"], "query timed out");

        let context = logger
            .warning(EventType::DbError, "retrying")
            .error_type("PoolTimeout")
            .error(boxed.as_ref())
            .emit();
        assert_eq!(context.extra["error_type"], "PoolTimeout");

        let context = logger
            .warning(EventType::DbError, "retrying")
            .error(&TimeoutError)
            .error_type("PoolTimeout")
            .emit();
        assert_eq!(context.extra["error_type"], "PoolTimeout");
    }

    #[test]
    fn test_failed_push_logs_one_warning() {
        let backend = Arc::new(Stub {
            fail: true,
            ..Stub::default()
        });
        let logger = StructuredLogger::new("ns", Some(backend.clone()));

        let (captured, _) = capture(|| {
            logger
                .error(EventType::DbError, "db timeout")
                .error(&TimeoutError)
                .emit()
        });

        assert_eq!(backend.sent.lock().unwrap().len(), 1);
        let warnings = captured.at(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("endpoint down"));
    }

    #[test]
    fn test_critical_and_suppressed_metrics() {
        let backend = Arc::new(Stub::default());
        let logger = StructuredLogger::new("ns", Some(backend.clone()));

        logger.critical(EventType::ApiError, "down").emit();
        logger.error(EventType::ApiError, "quiet").no_metric().emit();
        logger.warning(EventType::ApiError, "not counted").emit();

        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].metric_name, "CriticalError");
        assert_eq!(sent[0].dimension("Severity"), Some("Critical"));
    }

    #[test]
    fn test_uninitialized_backend_only_warns() {
        let logger = StructuredLogger::new("ns", None);
        let (captured, _) = capture(|| logger.error(EventType::ApiError, "boom").emit());
        assert_eq!(captured.at(Level::ERROR).len(), 1);
        assert_eq!(captured.at(Level::WARN).len(), 1);
    }

    #[test]
    fn test_actor_defaults_from_context() {
        let logger = StructuredLogger::new("ns", None);
        let scope = context::RequestScope::new();
        let context = context::sync_scope(scope, || {
            context::set_actor_id("actor-9");
            logger.info(EventType::ApiRequest, "in request").emit()
        });
        assert_eq!(context.actor_id.as_deref(), Some("actor-9"));
    }
}
