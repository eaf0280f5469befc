//! HTTP transport for the grading pipeline.
//!
//! `POST /api/cluster-students` takes `{"grades": [...]}` and answers with one result per
//! student per term. The service keeps no state between requests.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::models::StudentResult;
use crate::pipeline::{self, PipelineConfig};
use crate::validate;

pub const MODULE_NAME: &str = "grade-early-warning";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
}

impl AppState {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/cluster-students", post(cluster_students))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("{MODULE_NAME} listening on http://{bind}");
    info!("Health check: http://{bind}/health");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: MODULE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn cluster_students(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<StudentResult>>, ApiError> {
    let request = validate::parse_batch(&body).map_err(PipelineError::from)?;
    let results = pipeline::run(request, &state.config)?;
    info!(
        results = results.len(),
        at_risk = results.iter().filter(|r| r.is_at_risk).count(),
        "clustered grade batch"
    );
    Ok(Json(results))
}

#[derive(Debug)]
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PipelineError::Validation(err) => {
                warn!(error = %err, "rejected grade batch");
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            other => {
                error!(error = %other, "grade batch failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error performing student clustering".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
