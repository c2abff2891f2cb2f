//! Health and diagnostics endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("malscan-engine")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git revision the binary was built from
    pub git_hash: String,
    pub build_timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
}

/// Engine diagnostics
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub runtime: RuntimeInfo,
    /// Results store pool state ("uninitialized", "ready", ...)
    pub store_pool: String,
    pub store_url: String,
    pub store_index: String,
    pub plugins: PluginCounts,
    pub max_concurrent_workers: usize,
    pub scan_timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct RuntimeInfo {
    pub endpoint: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PluginCounts {
    pub total: usize,
    pub enabled: usize,
    pub intel: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "malscan-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds,
    })
}

/// GET /info
///
/// Always answers 200; an unreachable runtime is reported in the body.
pub async fn engine_info(State(state): State<AppState>) -> Json<InfoResponse> {
    let orchestrator = &state.orchestrator;
    let config = orchestrator.config();

    let runtime = match orchestrator.runtime().info().await {
        Ok(version) => RuntimeInfo {
            endpoint: config.runtime.endpoint.clone(),
            reachable: true,
            version: Some(version),
            error: None,
        },
        Err(e) => RuntimeInfo {
            endpoint: config.runtime.endpoint.clone(),
            reachable: false,
            version: None,
            error: Some(e.to_string()),
        },
    };

    let registry = orchestrator.registry();
    let plugins = PluginCounts {
        total: registry.all().len(),
        enabled: registry.all().iter().filter(|p| p.enabled).count(),
        intel: registry.intel_plugins().len(),
    };

    Json(InfoResponse {
        runtime,
        store_pool: orchestrator.pool().state().await.name().to_string(),
        store_url: config.store.url.clone(),
        store_index: config.store.index.clone(),
        plugins,
        max_concurrent_workers: config.limits.max_concurrent_workers,
        scan_timeout_seconds: config.limits.scan_timeout.as_secs(),
    })
}

/// Build health and diagnostics routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(engine_info))
}
