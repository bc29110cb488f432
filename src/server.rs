use crate::error::{FetchError, PipelineError};
use crate::pipeline::{HarvestRequest, Pipeline};
use crate::registry::{ProfileSummary, RegistryHandle};
use crate::render::{self, TableFormat};
use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::Server;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Shared handles available to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryHandle>,
    pub pipeline: Arc<Pipeline>,
    pub metrics: Option<PrometheusHandle>,
}

/// Pipeline error with its HTTP mapping
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            PipelineError::Fetch(FetchError::Timeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "fetch_timeout")
            }
            PipelineError::Fetch(FetchError::InvalidSource { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_source")
            }
            PipelineError::Fetch(_) => (StatusCode::BAD_GATEWAY, "fetch_failed"),
            PipelineError::Parse(_) => (StatusCode::UNPROCESSABLE_ENTITY, "parse_failed"),
            PipelineError::Aggregation(_) => (StatusCode::BAD_REQUEST, "invalid_aggregation"),
            PipelineError::UnknownProfile(_) => (StatusCode::BAD_REQUEST, "unknown_profile"),
            PipelineError::MissingSource(_) => (StatusCode::BAD_REQUEST, "missing_source"),
            PipelineError::Cancelled { .. } => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            PipelineError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            warn!("server: harvest failed status={} err={}", status.as_u16(), self.0);
        }
        let body = Json(serde_json::json!({
            "error": kind,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HarvestQuery {
    #[serde(default)]
    pub format: TableFormat,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "site_scraper",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_profiles(State(state): State<AppState>) -> Json<Vec<ProfileSummary>> {
    let registry = state.registry.snapshot();
    Json(registry.profiles().map(|p| p.summary()).collect())
}

async fn harvest(
    State(state): State<AppState>,
    Query(query): Query<HarvestQuery>,
    Json(request): Json<HarvestRequest>,
) -> Result<Response, ApiError> {
    let registry = state.registry.snapshot();
    let cancel = CancellationToken::new();
    // a client disconnect drops this future, and with it the guard
    let _cancel_on_drop = cancel.clone().drop_guard();

    let outcome = state.pipeline.run(&registry, &request, &cancel).await?;
    match query.format {
        TableFormat::Json => Ok(Json(outcome).into_response()),
        TableFormat::Csv => match render::to_csv(&outcome.table) {
            Ok(body) => Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response()),
            Err(e) => {
                error!("server: csv rendering failed: {}", e);
                Ok((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
            }
        },
    }
}

async fn reload(State(state): State<AppState>) -> Response {
    match state.registry.reload() {
        Ok(registry) => Json(serde_json::json!({
            "status": "reloaded",
            "profiles": registry.len(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": "reload_failed",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Build the router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/profiles", get(list_profiles))
        .route("/harvest", post(harvest))
        .route("/admin/reload", post(reload))
        .route("/metrics", get(metrics))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

/// Serve until ctrl-c
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), hyper::Error> {
    let app = create_router(state);

    info!("server: listening on http://{}", addr);
    info!("server: health check at http://{}/health", addr);

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("server: shutting down");
        })
        .await
}
