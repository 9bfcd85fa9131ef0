//! REST API endpoints.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};

use super::metrics::REQUEST_LATENCY;
use crate::gateway::QueryGateway;
use crate::watcher::{Indexer, RebuildStats};
use crate::Error;

/// Shared state for the REST handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub indexer: Arc<Indexer>,
    pub gateway: QueryGateway,
}

impl AppState {
    #[must_use]
    pub fn new(indexer: Arc<Indexer>) -> Self {
        Self {
            indexer,
            gateway: QueryGateway::default(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
}

/// Body of `POST /api/v1/query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub statement: String,
}

/// Body of `PUT /api/v1/watch-root`.
#[derive(Debug, Deserialize)]
pub struct WatchRootRequest {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
struct WatchRootResponse {
    root: PathBuf,
    rebuild: RebuildStats,
}

/// Error body returned with a non-2xx status.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Config(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Run blocking index work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}

/// Create REST API router.
pub fn create_rest_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/query", post(query))
        .route("/api/v1/rebuild", post(rebuild))
        .route("/api/v1/watch-root", put(change_watch_root))
        .route_layer(middleware::from_fn(track_latency))
        .with_state(state)
}

async fn track_latency(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |p| p.as_str().to_string());
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    REQUEST_LATENCY
        .with_label_values(&[&endpoint, &method])
        .observe(started.elapsed().as_secs_f64());
    response
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match state.indexer.store().database().health_check() {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "error"
        }
    };

    let response = HealthResponse {
        status: if db_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        }
        .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status.to_string(),
    };

    let status_code = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

/// Prometheus metrics endpoint.
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                b"Failed to encode metrics".to_vec(),
            )
        }
    }
}

/// Index status: root, watch state, entry count, last rebuild.
async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let indexer = Arc::clone(&state.indexer);
    let status = blocking(move || indexer.status()).await?;

    Ok(Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "index": status,
    })))
}

/// Validate and run one statement. Denied statements get 403.
async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    let store = state.indexer.store().clone();
    let gateway = state.gateway;
    let response = blocking(move || gateway.execute(&store, &request.statement)).await?;

    let code = if response.verdict.allowed {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((code, Json(response)).into_response())
}

/// Full rebuild of the current root.
async fn rebuild(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let indexer = Arc::clone(&state.indexer);
    let stats = blocking(move || indexer.rebuild_now()).await?;
    Ok(Json(stats))
}

/// Switch the watch root: stop, rebuild, restart.
async fn change_watch_root(
    State(state): State<AppState>,
    Json(request): Json<WatchRootRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let indexer = Arc::clone(&state.indexer);
    let (root, rebuild) = blocking(move || {
        let stats = indexer.change_root(&request.path)?;
        Ok((indexer.root(), stats))
    })
    .await?;

    Ok(Json(WatchRootResponse { root, rebuild }))
}
