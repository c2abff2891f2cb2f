//! Results store
//!
//! The orchestrator writes the seed document of each scan and the detected
//! content type; workers enrich the same document themselves. Connections
//! are handed out by the execute-once [`StorePool`].

mod elasticsearch;
mod pool;

pub use elasticsearch::{ElasticsearchConnector, ElasticsearchStore};
pub use pool::{PoolError, PoolState, StorePool};

use crate::config::StoreConfig;
use crate::models::{ScanDocument, ScanId};
use std::sync::Arc;
use thiserror::Error;

/// Results store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// Connection-level failure a not-yet-ready store produces
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_connect() || e.is_timeout(),
            StoreError::Status { status, .. } => *status == 503,
            StoreError::InvalidResponse(_) => false,
        }
    }
}

/// Connected results store handle
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist the seed document; returns the store-issued scan id
    async fn store_sample(&self, doc: &ScanDocument) -> Result<ScanId, StoreError>;

    /// Record the detected content type on an existing scan document
    async fn update_mime(&self, scan_id: &ScanId, mime: &str) -> Result<(), StoreError>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Opens results store connections for the [`StorePool`]
#[async_trait::async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, config: &StoreConfig) -> Result<Arc<dyn ResultStore>, StoreError>;
}
