//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request code and audit recorder produce:
//!     → tracing.rs (spans; local sink or batch sink)
//!         → exporter.rs (collector selection, graceful export)
//!             → otlp.rs (OTLP/HTTP JSON body)
//!     → logging.rs (typed log lines)
//!         → metrics.rs (error counts to the metrics backend)
//!
//! Consumers:
//!     → Span collector (OTLP/HTTP)
//!     → Metrics endpoint (Prometheus scrape) or HTTP metrics push
//!     → Log aggregation (stdout via the tracing subscriber)
//! ```
//!
//! # Design Decisions
//! - Nothing in this subsystem fails the caller; unavailable destinations
//!   degrade to local logging
//! - Trace id flows from the request scope into every span
//! - Metrics are cheap (atomic increments)

pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod otlp;
pub mod tracing;

pub use exporter::{ExportError, ExportResult, ExporterFactory, OtlpHttpFactory, SpanExporter};
pub use logging::{EventType, LogContext, StructuredLogger};
pub use metrics::{MetricDatum, MetricsBackend, MetricsError};
pub use tracing::{SpanData, SpanHandle, SpanSink, Tracer};
