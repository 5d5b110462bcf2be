//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize the pipeline subsystems in dependency order
//! - Start background tasks (span batching, metric push, audit delivery)
//! - Register change-capture hooks when auditing is enabled
//!
//! # Design Decisions
//! - An unreachable collector or metrics backend never fails startup
//! - An unusable audit service URL is fatal while auditing is enabled

use std::sync::Arc;

use thiserror::Error;

use crate::audit::delivery::{AuditDispatcher, DeliveryError};
use crate::audit::record::AuditRecorder;
use crate::capture::change::ChangeCapture;
use crate::capture::hooks::HookRegistry;
use crate::config::PipelineConfig;
use crate::http::server::AppState;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::exporter::OtlpHttpFactory;
use crate::observability::logging::StructuredLogger;
use crate::observability::metrics;
use crate::observability::tracing::Tracer;
use crate::persistence::MemoryStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("audit delivery could not start: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Build every subsystem from `config`. Must be called inside a Tokio runtime.
pub async fn start(config: &PipelineConfig, shutdown: &Shutdown) -> Result<AppState, StartupError> {
    let factory = OtlpHttpFactory::new(config.service.name.clone(), &config.tracing);
    let tracer = Tracer::from_config(&config.tracing, &factory, shutdown).await;

    let backend = metrics::build_backend(&config.metrics, shutdown);
    let logger = Arc::new(StructuredLogger::new(config.metrics.namespace.clone(), backend));

    let mut hooks = HookRegistry::new();
    let dispatcher = if config.audit.enabled {
        let dispatcher = AuditDispatcher::start(&config.audit)?;
        let capture = Arc::new(ChangeCapture::new(
            Arc::new(dispatcher.clone()),
            config.service.system_id.clone(),
        ));
        hooks.register_all(&config.audit.entity_types, capture);
        Some(dispatcher)
    } else {
        tracing::info!("Audit record creation disabled, change capture not registered");
        None
    };

    tracing::info!(
        span_destination = %tracer.destination(),
        audit_enabled = config.audit.enabled,
        metrics_backend = ?config.metrics.backend,
        "Pipeline started"
    );

    Ok(AppState {
        store: MemoryStore::new(hooks),
        recorder: AuditRecorder::new(tracer),
        logger,
        dispatcher,
    })
}
