//! HTTP surface.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /capture` | capture or serve a cached artifact (bearer auth when configured) |
//! | `GET /healthz`, `GET /health` | 200 once the rendering engine is up, 503 before |
//! | `GET /metrics` | Prometheus exposition, 404 when metrics are disabled |

use crate::{
    require_bearer, BearerAuth, CaptureError, CaptureQuery, CaptureRequest, CaptureService,
    EnginePhase, ErrorSeverity,
};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Clone)]
pub struct AppState {
    pub service: CaptureService,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn build_router(state: AppState, auth: BearerAuth) -> Router {
    let capture = Router::new()
        .route("/capture", get(capture_handler))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer));

    Router::new()
        .merge(capture)
        .route("/healthz", get(health_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn capture_handler(
    State(state): State<AppState>,
    query: Result<Query<CaptureQuery>, QueryRejection>,
) -> Result<Response, CaptureError> {
    if !state.service.engine().is_ready().await {
        return Err(CaptureError::NotReady);
    }

    let Query(query) = query.map_err(|e| CaptureError::Validation(e.body_text()))?;
    let request = CaptureRequest::from_query(query)?;
    let artifact = state.service.capture(request).await?;
    let body = tokio::fs::read(&artifact.path).await?;

    let cache_status = if artifact.cache_hit { "HIT" } else { "MISS" };
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(artifact.content_type())),
            (X_CACHE, HeaderValue::from_static(cache_status)),
            (CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        body,
    )
        .into_response())
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let service = &state.service;
    let (status, label) = match service.engine().phase().await {
        EnginePhase::Ready => (StatusCode::OK, "ready"),
        EnginePhase::Uninitialized => (StatusCode::SERVICE_UNAVAILABLE, "starting"),
        EnginePhase::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
    };

    let body = json!({
        "status": label,
        "active_captures": service.gate().active_count(),
        "waiting_captures": service.gate().waiting_count(),
        "max_concurrent_captures": service.gate().capacity(),
        "cache_backend": service.cache().backend(),
    });
    (status, Json(body)).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

impl IntoResponse for CaptureError {
    fn into_response(self) -> Response {
        match self.severity() {
            ErrorSeverity::Low => debug!("Rejected request: {}", self),
            ErrorSeverity::Medium => warn!("Request failed: {}", self),
            ErrorSeverity::High | ErrorSeverity::Critical => error!("Request failed: {}", self),
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
