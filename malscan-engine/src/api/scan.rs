//! Scan submission endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    models::ScanReport,
    AppState,
};

/// POST /scan request
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// Path of the sample on the engine host
    pub path: String,
    /// Stream worker unit output into the engine log
    #[serde(default)]
    pub logs: bool,
}

/// POST /scan
///
/// Runs the scan to completion and answers with its report. Scan failures
/// map to a status code by failure stage.
pub async fn start_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<ScanReport>> {
    if request.path.is_empty() {
        return Err(ApiError::BadRequest("path must not be empty".to_string()));
    }

    tracing::info!(path = %request.path, logs = request.logs, "Scan requested");

    let report = state.orchestrator.scan(&request.path, request.logs).await?;
    Ok(Json(report))
}

/// Build scan routes
pub fn scan_routes() -> Router<AppState> {
    Router::new().route("/scan", post(start_scan))
}
