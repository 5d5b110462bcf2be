//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the passenger API
//! - Wire up middleware (correlation scope, request timeout, tracing)
//! - Bind server to listener and stop on the shutdown signal
//! - Run writes through the audited persistence layer

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::audit::delivery::{AuditDispatcher, DeliverySnapshot};
use crate::audit::record::AuditRecorder;
use crate::config::ServerConfig;
use crate::http::middleware::correlation_middleware;
use crate::observability::logging::{EventType, StructuredLogger};
use crate::persistence::{MemoryStore, Passenger, PersistenceError, ShipCallManifest};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: MemoryStore,
    pub recorder: AuditRecorder,
    pub logger: Arc<StructuredLogger>,
    pub dispatcher: Option<AuditDispatcher>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: &'static str, id: i64 },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound { .. } | ApiError::Persistence(PersistenceError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPassenger {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub manifest_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassengerUpdate {
    pub name: Option<String>,
    pub weight: Option<f64>,
    pub nationality: Option<String>,
    pub manifest_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManifest {
    pub vessel_name: String,
    pub port: String,
    #[serde(default)]
    pub passenger_count: i64,
}

/// HTTP server for the passenger API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ServerConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        let recorder = state.recorder.clone();
        let routes = Router::new()
            .route("/health", get(health_handler))
            .route("/passengers", post(create_passenger))
            .route(
                "/passengers/{id}",
                get(get_passenger).put(update_passenger).delete(delete_passenger),
            )
            .route("/manifests", post(create_manifest))
            .with_state(state);
        with_layers(routes, config, recorder)
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Outermost first: trace, correlation scope, timeout. The timeout sits
/// inside the scope so a timed-out request is still audited and echoed.
#[allow(deprecated)]
fn with_layers(router: Router, config: &ServerConfig, recorder: AuditRecorder) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(recorder, correlation_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs))),
    )
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    span_destination: String,
    audit: Option<DeliverySnapshot>,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthReport {
        status: "ok",
        span_destination: state.recorder.tracer().destination().to_string(),
        audit: state.dispatcher.as_ref().map(AuditDispatcher::stats),
    })
}

fn log_failure(state: &AppState, operation: &str, error: &ApiError) {
    match error {
        ApiError::NotFound { id, .. } => state
            .logger
            .warning(EventType::ValidationError, format!("{} failed", operation))
            .entity(id.to_string())
            .field("detail", error)
            .emit(),
        ApiError::Persistence(e) => state
            .logger
            .error(EventType::DbError, format!("{} failed", operation))
            .error(e)
            .emit(),
    };
}

async fn create_passenger(
    State(state): State<AppState>,
    Json(body): Json<NewPassenger>,
) -> Result<(StatusCode, Json<Passenger>), ApiError> {
    let result = state.recorder.trace_sync("create_passenger", &body, || {
        let mut passenger = Passenger::new(body.name.clone(), body.weight);
        passenger.nationality = body.nationality.clone();
        passenger.manifest_id = body.manifest_id;

        let mut session = state.store.session();
        session.add(passenger.clone());
        passenger.id = session.commit()?.first().copied();
        Ok::<_, ApiError>(passenger)
    });

    match result {
        Ok(passenger) => {
            state
                .logger
                .info(EventType::Custom("CREATE_PASSENGER_SUCCESS".into()), "Passenger created")
                .entity(passenger.id.map(|id| id.to_string()).unwrap_or_default())
                .emit();
            Ok((StatusCode::CREATED, Json(passenger)))
        }
        Err(e) => {
            log_failure(&state, "create_passenger", &e);
            Err(e)
        }
    }
}

async fn get_passenger(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Passenger>, ApiError> {
    let store = state.store.clone();
    let result = state
        .recorder
        .trace_async("get_passenger", &id, async move {
            match store.get::<Passenger>(id) {
                Ok(Some(passenger)) => Ok(passenger),
                Ok(None) => Err(ApiError::NotFound { entity_type: "Passenger", id }),
                Err(e) => Err(ApiError::from(e)),
            }
        })
        .await;

    result.map(Json).inspect_err(|e| log_failure(&state, "get_passenger", e))
}

async fn update_passenger(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PassengerUpdate>,
) -> Result<Json<Passenger>, ApiError> {
    let result = state.recorder.trace_sync("update_passenger", &body, || {
        let mut passenger = state
            .store
            .get::<Passenger>(id)?
            .ok_or(ApiError::NotFound { entity_type: "Passenger", id })?;
        if let Some(name) = &body.name {
            passenger.name = name.clone();
        }
        if let Some(weight) = body.weight {
            passenger.weight = weight;
        }
        if body.nationality.is_some() {
            passenger.nationality = body.nationality.clone();
        }
        if body.manifest_id.is_some() {
            passenger.manifest_id = body.manifest_id;
        }

        let mut session = state.store.session();
        session.add(passenger.clone());
        session.commit()?;
        Ok::<_, ApiError>(passenger)
    });

    result.map(Json).inspect_err(|e| log_failure(&state, "update_passenger", e))
}

async fn delete_passenger(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let result = state.recorder.trace_sync("delete_passenger", &id, || {
        let passenger = state
            .store
            .get::<Passenger>(id)?
            .ok_or(ApiError::NotFound { entity_type: "Passenger", id })?;
        let mut session = state.store.session();
        session.delete(passenger);
        session.commit()?;
        Ok::<_, ApiError>(())
    });

    result
        .map(|()| StatusCode::NO_CONTENT)
        .inspect_err(|e| log_failure(&state, "delete_passenger", e))
}

async fn create_manifest(
    State(state): State<AppState>,
    Json(body): Json<NewManifest>,
) -> Result<(StatusCode, Json<ShipCallManifest>), ApiError> {
    let result = state.recorder.trace_sync("create_manifest", &body, || {
        let mut manifest = ShipCallManifest {
            id: None,
            vessel_name: body.vessel_name.clone(),
            port: body.port.clone(),
            passenger_count: body.passenger_count,
        };
        let mut session = state.store.session();
        session.add(manifest.clone());
        manifest.id = session.commit()?.first().copied();
        Ok::<_, ApiError>(manifest)
    });

    result
        .map(|manifest| (StatusCode::CREATED, Json(manifest)))
        .inspect_err(|e| log_failure(&state, "create_manifest", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::TRACE_ID_RESPONSE_HEADER;
    use crate::observability::tracing::{MemorySink, Tracer};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(10)).await;
        "done"
    }

    #[tokio::test]
    async fn test_timed_out_request_is_audited() {
        let sink = MemorySink::new();
        let recorder = AuditRecorder::new(Tracer::new(sink.clone()));
        let config = ServerConfig {
            request_timeout_secs: 1,
            ..ServerConfig::default()
        };
        let app = with_layers(Router::new().route("/slow", get(slow)), &config, recorder);

        let request = Request::builder()
            .uri("/slow")
            .header("x-trace-id", "0af7651916cd43dd8448eb211c80319c")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            response.headers()[TRACE_ID_RESPONSE_HEADER],
            "0af7651916cd43dd8448eb211c80319c"
        );
        let spans = sink.spans();
        let span = spans
            .iter()
            .find(|s| s.name == "/slow")
            .expect("request span recorded");
        assert_eq!(span.attributes["http.status_code"], "408");
        assert_eq!(span.trace_id, "0af7651916cd43dd8448eb211c80319c");
    }
}
