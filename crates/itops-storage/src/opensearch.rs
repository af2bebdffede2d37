//! OpenSearch-compatible HTTP document store.

use crate::query::{filters_to_dsl, Filter, SearchRequest};
use crate::{BulkOutcome, DocumentStore, StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default timeout for store requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings
#[derive(Debug, Clone)]
pub struct OpenSearchStoreConfig {
    /// Base URL, e.g. `http://opensearch:9200`
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl Default for OpenSearchStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: String::new(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl From<&itops_core::config::OpenSearchConfig> for OpenSearchStoreConfig {
    fn from(cfg: &itops_core::config::OpenSearchConfig) -> Self {
        Self {
            url: cfg.url(),
            username: cfg.user.clone(),
            password: cfg.password.clone(),
            timeout: cfg.timeout,
        }
    }
}

/// Document store speaking the `_doc`/`_mget`/`_search`/`_update`/`_bulk` API.
///
/// Writes use `refresh=wait_for` so a write is visible to the next search.
#[derive(Debug, Clone)]
pub struct OpenSearchStore {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl OpenSearchStore {
    pub fn new(config: OpenSearchStoreConfig) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username,
            password: config.password,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> StoreResult<reqwest::Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout
            } else {
                StoreError::Connection(e.to_string())
            }
        })
    }

    async fn json_body(response: reqwest::Response) -> StoreResult<Value> {
        response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn failure(response: reqwest::Response) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            401 | 403 => StoreError::Authentication(body),
            400 => StoreError::InvalidRequest(body),
            _ => {
                error!(status, body = %body, "Document store error");
                StoreError::Backend(format!("Status {}: {}", status, body))
            }
        }
    }
}

#[async_trait]
impl DocumentStore for OpenSearchStore {
    #[instrument(skip(self), fields(service = "opensearch"))]
    async fn get(&self, index: &str, id: &str) -> StoreResult<Option<Value>> {
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("{index}/_doc/{id}")))
            .await?;
        match response.status().as_u16() {
            200 => {
                let body = Self::json_body(response).await?;
                Ok(body.get("_source").cloned())
            }
            404 => Ok(None),
            _ => Err(Self::failure(response).await),
        }
    }

    #[instrument(skip(self, ids), fields(service = "opensearch", count = ids.len()))]
    async fn mget(&self, index: &str, ids: &[String]) -> StoreResult<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("{index}/_mget"))
                    .json(&json!({ "ids": ids })),
            )
            .await?;
        match response.status().as_u16() {
            200 => {
                let body = Self::json_body(response).await?;
                let docs = body["docs"]
                    .as_array()
                    .map(|docs| {
                        docs.iter()
                            .filter(|d| d["found"].as_bool().unwrap_or(false))
                            .filter_map(|d| d.get("_source").cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(docs)
            }
            404 => Ok(Vec::new()),
            _ => Err(Self::failure(response).await),
        }
    }

    #[instrument(skip(self, request), fields(service = "opensearch"))]
    async fn search(&self, index: &str, request: &SearchRequest) -> StoreResult<Vec<Value>> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("{index}/_search"))
                    .json(&request.to_dsl()),
            )
            .await?;
        match response.status().as_u16() {
            200 => {
                let body = Self::json_body(response).await?;
                let hits = body["hits"]["hits"]
                    .as_array()
                    .map(|hits| hits.iter().filter_map(|h| h.get("_source").cloned()).collect())
                    .unwrap_or_default();
                Ok(hits)
            }
            404 => {
                debug!(index, "Index not found, empty result");
                Ok(Vec::new())
            }
            _ => Err(Self::failure(response).await),
        }
    }

    #[instrument(skip(self, document), fields(service = "opensearch"))]
    async fn index(&self, index: &str, id: &str, document: Value) -> StoreResult<()> {
        let response = self
            .send(
                self.request(
                    reqwest::Method::PUT,
                    &format!("{index}/_doc/{id}?refresh=wait_for"),
                )
                .json(&document),
            )
            .await?;
        match response.status().as_u16() {
            200 | 201 => Ok(()),
            _ => Err(Self::failure(response).await),
        }
    }

    #[instrument(skip(self, partial), fields(service = "opensearch"))]
    async fn update(&self, index: &str, id: &str, partial: Value) -> StoreResult<()> {
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("{index}/_update/{id}?refresh=wait_for"),
                )
                .json(&json!({ "doc": partial })),
            )
            .await?;
        match response.status().as_u16() {
            200 | 201 => Ok(()),
            404 => Err(StoreError::NotFound {
                index: index.to_string(),
                id: id.to_string(),
            }),
            _ => Err(Self::failure(response).await),
        }
    }

    #[instrument(skip(self, updates), fields(service = "opensearch", count = updates.len()))]
    async fn bulk_update(&self, index: &str, updates: Vec<(String, Value)>) -> StoreResult<BulkOutcome> {
        if updates.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let mut body = String::new();
        for (id, partial) in &updates {
            body.push_str(&json!({ "update": { "_index": index, "_id": id } }).to_string());
            body.push('\n');
            body.push_str(&json!({ "doc": partial }).to_string());
            body.push('\n');
        }

        let response = self
            .send(
                self.request(reqwest::Method::POST, "_bulk?refresh=wait_for")
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let body = Self::json_body(response).await?;
        let mut outcome = BulkOutcome::default();
        for item in body["items"].as_array().map(Vec::as_slice).unwrap_or_default() {
            let result = &item["update"];
            let status = result["status"].as_u64().unwrap_or(0);
            if (200..300).contains(&status) {
                outcome.succeeded += 1;
            } else {
                let id = result["_id"].as_str().unwrap_or_default().to_string();
                let reason = result["error"]["reason"]
                    .as_str()
                    .unwrap_or("unknown")
                    .to_string();
                outcome.failed.push((id, reason));
            }
        }
        if !outcome.is_complete() {
            warn!(index, failed = outcome.failed.len(), "Bulk update partially failed");
        }
        Ok(outcome)
    }

    #[instrument(skip(self, filters), fields(service = "opensearch"))]
    async fn count(&self, index: &str, filters: &[Filter]) -> StoreResult<u64> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, &format!("{index}/_count"))
                    .json(&json!({ "query": filters_to_dsl(filters) })),
            )
            .await?;
        match response.status().as_u16() {
            200 => {
                let body = Self::json_body(response).await?;
                Ok(body["count"].as_u64().unwrap_or(0))
            }
            404 => Ok(0),
            _ => Err(Self::failure(response).await),
        }
    }

    async fn health_check(&self) -> StoreResult<()> {
        let response = self
            .send(self.request(reqwest::Method::GET, "_cluster/health"))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode,
        routing::{get, post, put},
        Json, Router,
    };

    async fn serve(app: Router) -> OpenSearchStore {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        OpenSearchStore::new(OpenSearchStoreConfig {
            url: format!("http://{addr}/"),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_client_creation() {
        assert!(OpenSearchStore::new(OpenSearchStoreConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_get_and_missing() {
        let app = Router::new().route(
            "/:index/_doc/:id",
            get(|Path((_, id)): Path<(String, String)>| async move {
                if id == "1" {
                    (StatusCode::OK, Json(json!({"_source": {"event_id": 1}})))
                } else {
                    (StatusCode::NOT_FOUND, Json(json!({"found": false})))
                }
            }),
        );
        let store = serve(app).await;
        let doc = store.get("idx", "1").await.unwrap().unwrap();
        assert_eq!(doc["event_id"], 1);
        assert!(store.get("idx", "2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_extracts_sources() {
        let app = Router::new().route(
            "/:index/_search",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["size"], 5000);
                Json(json!({"hits": {"hits": [
                    {"_source": {"n": 1}},
                    {"_source": {"n": 2}}
                ]}}))
            }),
        );
        let store = serve(app).await;
        let hits = store.search("idx", &SearchRequest::new()).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_reports_item_failures() {
        let app = Router::new().route(
            "/_bulk",
            post(|| async {
                Json(json!({"errors": true, "items": [
                    {"update": {"_id": "1", "status": 200}},
                    {"update": {"_id": "2", "status": 404, "error": {"reason": "document missing"}}}
                ]}))
            }),
        );
        let store = serve(app).await;
        let outcome = store
            .bulk_update(
                "idx",
                vec![("1".into(), json!({"a": 1})), ("2".into(), json!({"a": 1}))],
            )
            .await
            .unwrap();
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failed, vec![("2".to_string(), "document missing".to_string())]);
    }

    #[tokio::test]
    async fn test_auth_failure_maps() {
        let app = Router::new().route(
            "/:index/_doc/:id",
            put(|| async { (StatusCode::UNAUTHORIZED, "denied") }),
        );
        let store = serve(app).await;
        let err = store.index("idx", "1", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::Authentication(_)));
    }
}
