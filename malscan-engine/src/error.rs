//! Error types for malscan-engine
//!
//! [`ScanError`] is the scan-level taxonomy: every failure a scan can report
//! carries the stage it happened in and a stable code. [`ApiError`] maps those
//! onto HTTP responses for the `serve` surface.

use crate::services::runtime::RuntimeError;
use crate::services::store::PoolError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed underlying cause carried by several [`ScanError`] variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pipeline stage a [`ScanError`] originated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Validation,
    Infrastructure,
    Registration,
    Detection,
    Dispatch,
    Aggregation,
}

impl ScanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStage::Validation => "validation",
            ScanStage::Infrastructure => "infrastructure",
            ScanStage::Registration => "registration",
            ScanStage::Detection => "detection",
            ScanStage::Dispatch => "dispatch",
            ScanStage::Aggregation => "aggregation",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scan-level error
///
/// Validation and infrastructure errors abort the scan immediately. Worker
/// errors (`WorkerTimeout`, `WorkerExecution`) are captured per worker in a
/// [`crate::models::WorkerOutcome`] and never abort sibling workers.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Empty or unresolvable input path
    #[error("Cannot resolve path {path:?}: {reason}")]
    PathResolution { path: String, reason: String },

    #[error("File not found: {path}")]
    NotFound { path: String },

    /// Directory, device, fifo, socket or a symlink to one of those
    #[error("Not a regular file: {path}")]
    NotRegularFile { path: String },

    #[error("File too large: {size} bytes exceeds limit of {max} bytes ({path})")]
    SizeLimitExceeded { path: String, size: u64, max: u64 },

    #[error("Container runtime unavailable: {source}")]
    RuntimeUnavailable {
        #[source]
        source: RuntimeError,
    },

    /// A required infrastructure unit (results store) could not be started
    #[error("Failed to start {unit}: {source}")]
    InfraStart {
        unit: String,
        #[source]
        source: BoxError,
    },

    /// Results-store pool misuse or recorded init failure
    #[error("Results store pool error: {0}")]
    Pool(#[from] PoolError),

    /// Sample could not be persisted or copied into the shared volume
    #[error("Failed to register sample: {message}: {source}")]
    Registration {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Content-type detection failed: {source}")]
    Detection {
        #[source]
        source: BoxError,
    },

    #[error("Content-type detection exceeded {timeout:?}")]
    DetectionTimeout { timeout: Duration },

    #[error("Worker {plugin} exceeded its {timeout:?} deadline")]
    WorkerTimeout { plugin: String, timeout: Duration },

    #[error("Worker {plugin} failed: {source}")]
    WorkerExecution {
        plugin: String,
        #[source]
        source: BoxError,
    },

    /// Overall scan deadline fired before every dispatched worker finished
    #[error("Scan deadline exceeded: {finished} workers finished, {outstanding} outstanding")]
    ScanDeadlineExceeded { finished: usize, outstanding: usize },
}

impl ScanError {
    /// Stage the error originated in
    pub fn stage(&self) -> ScanStage {
        match self {
            ScanError::PathResolution { .. }
            | ScanError::NotFound { .. }
            | ScanError::NotRegularFile { .. }
            | ScanError::SizeLimitExceeded { .. } => ScanStage::Validation,
            ScanError::RuntimeUnavailable { .. }
            | ScanError::InfraStart { .. }
            | ScanError::Pool(_) => ScanStage::Infrastructure,
            ScanError::Registration { .. } => ScanStage::Registration,
            ScanError::Detection { .. } | ScanError::DetectionTimeout { .. } => {
                ScanStage::Detection
            }
            ScanError::WorkerTimeout { .. } | ScanError::WorkerExecution { .. } => {
                ScanStage::Dispatch
            }
            ScanError::ScanDeadlineExceeded { .. } => ScanStage::Aggregation,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::PathResolution { .. } => "path_resolution",
            ScanError::NotFound { .. } => "not_found",
            ScanError::NotRegularFile { .. } => "not_regular_file",
            ScanError::SizeLimitExceeded { .. } => "size_limit_exceeded",
            ScanError::RuntimeUnavailable { .. } => "runtime_unavailable",
            ScanError::InfraStart { .. } => "infra_start",
            ScanError::Pool(PoolError::NilDatabase) => "nil_database",
            ScanError::Pool(PoolError::NotInitialized) => "not_initialized",
            ScanError::Pool(_) => "pool",
            ScanError::Registration { .. } => "registration",
            ScanError::Detection { .. } => "detection",
            ScanError::DetectionTimeout { .. } => "detection_timeout",
            ScanError::WorkerTimeout { .. } => "worker_timeout",
            ScanError::WorkerExecution { .. } => "worker_execution",
            ScanError::ScanDeadlineExceeded { .. } => "scan_deadline_exceeded",
        }
    }

    /// Whether this error aborts the whole scan
    ///
    /// Worker-level errors are recorded and logged only.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ScanError::WorkerTimeout { .. } | ScanError::WorkerExecution { .. }
        )
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Scan failed; status derived from the scan error
    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Scan(err) => match err {
                ScanError::PathResolution { .. } | ScanError::NotRegularFile { .. } => {
                    StatusCode::BAD_REQUEST
                }
                ScanError::NotFound { .. } => StatusCode::NOT_FOUND,
                ScanError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ScanError::RuntimeUnavailable { .. }
                | ScanError::InfraStart { .. }
                | ScanError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,
                ScanError::DetectionTimeout { .. } | ScanError::ScanDeadlineExceeded { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::BadRequest(msg) => json!({
                "error": { "code": "BAD_REQUEST", "message": msg }
            }),
            ApiError::Scan(err) => json!({
                "error": {
                    "code": err.code(),
                    "stage": err.stage(),
                    "message": err.to_string(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
