//! Elasticsearch results store

use super::{ResultStore, StoreConnector, StoreError};
use crate::config::StoreConfig;
use crate::models::{ScanDocument, ScanId};
use crate::utils::retry_until_ready;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("malscan/", env!("CARGO_PKG_VERSION"));

/// Default wait for a freshly started store to accept requests
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(rename = "_id")]
    id: String,
}

/// Document type used by typeless (7.x+) clusters
const TYPELESS: &str = "_doc";

/// Connected Elasticsearch index
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    client: Client,
    config: StoreConfig,
}

impl ElasticsearchStore {
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url(), self.config.index)
    }

    /// Endpoint documents are created at
    ///
    /// Configured document types other than `_doc` address 6.x-style typed
    /// indices.
    fn document_url(&self) -> String {
        format!("{}/{}", self.index_url(), self.doc_type())
    }

    fn update_url(&self, scan_id: &ScanId) -> String {
        if self.doc_type() == TYPELESS {
            format!("{}/_update/{}", self.index_url(), scan_id)
        } else {
            format!("{}/{}/{}/_update", self.index_url(), self.doc_type(), scan_id)
        }
    }

    fn doc_type(&self) -> &str {
        if self.config.doc_type.is_empty() {
            TYPELESS
        } else {
            &self.config.doc_type
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.config.username, Some(&self.config.password))
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status { status, body })
    }

    /// Cluster handshake
    async fn ping(&self) -> Result<(), StoreError> {
        self.send(self.client.get(self.base_url())).await?;
        Ok(())
    }

    /// Create the index unless it already exists
    async fn ensure_index(&self) -> Result<(), StoreError> {
        let head = self
            .authorize(self.client.head(self.index_url()))
            .send()
            .await?;

        match head.status() {
            s if s.is_success() => {
                debug!(index = %self.config.index, "Index exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                info!(index = %self.config.index, "Creating index");
                match self.send(self.client.put(self.index_url())).await {
                    Ok(_) => Ok(()),
                    // Lost a creation race with another client
                    Err(StoreError::Status { status: 400, ref body })
                        if body.contains("resource_already_exists_exception") =>
                    {
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            s => Err(StoreError::Status {
                status: s.as_u16(),
                body: String::new(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl ResultStore for ElasticsearchStore {
    async fn store_sample(&self, doc: &ScanDocument) -> Result<ScanId, StoreError> {
        let response = self
            .send(self.client.post(self.document_url()).json(doc))
            .await?;
        let indexed: IndexResponse = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        debug!(scan_id = %indexed.id, sha256 = %doc.file.sha256, "Stored seed document");
        Ok(ScanId(indexed.id))
    }

    async fn update_mime(&self, scan_id: &ScanId, mime: &str) -> Result<(), StoreError> {
        let body = json!({ "doc": { "file": { "mime": mime } } });
        self.send(self.client.post(self.update_url(scan_id)).json(&body))
            .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("elasticsearch {} (index {})", self.base_url(), self.config.index)
    }
}

/// Opens [`ElasticsearchStore`] connections
#[derive(Debug, Clone)]
pub struct ElasticsearchConnector {
    ready_timeout: Duration,
}

impl Default for ElasticsearchConnector {
    fn default() -> Self {
        Self::new(DEFAULT_READY_TIMEOUT)
    }
}

impl ElasticsearchConnector {
    /// `ready_timeout` bounds the wait for a store that is still starting
    pub fn new(ready_timeout: Duration) -> Self {
        Self { ready_timeout }
    }
}

#[async_trait::async_trait]
impl StoreConnector for ElasticsearchConnector {
    async fn connect(&self, config: &StoreConfig) -> Result<Arc<dyn ResultStore>, StoreError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        let store = ElasticsearchStore {
            client,
            config: config.clone(),
        };

        retry_until_ready(
            "elasticsearch handshake",
            self.ready_timeout,
            StoreError::is_transient,
            || store.ping(),
        )
        .await?;
        store.ensure_index().await?;

        info!(store = %store.describe(), "Connected to results store");
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(doc_type: &str) -> ElasticsearchStore {
        ElasticsearchStore {
            client: Client::new(),
            config: StoreConfig {
                url: "http://es.internal:9200/".to_string(),
                doc_type: doc_type.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn typed_index_urls() {
        let s = store("samples");
        assert_eq!(s.document_url(), "http://es.internal:9200/malice/samples");
        assert_eq!(
            s.update_url(&ScanId("abc".to_string())),
            "http://es.internal:9200/malice/samples/abc/_update"
        );
    }

    #[test]
    fn typeless_index_urls() {
        for doc_type in ["_doc", ""] {
            let s = store(doc_type);
            assert_eq!(s.document_url(), "http://es.internal:9200/malice/_doc");
            assert_eq!(
                s.update_url(&ScanId("abc".to_string())),
                "http://es.internal:9200/malice/_update/abc"
            );
        }
    }

    #[tokio::test]
    async fn unreachable_store_fails_after_ready_timeout() {
        let connector = ElasticsearchConnector::new(Duration::from_millis(200));
        let config = StoreConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let result = connector.connect(&config).await;
        assert!(matches!(result, Err(StoreError::Http(_))));
    }
}
