//! OpenSearch client implementation.
//!
//! This module provides the concrete implementation of `SearchIndexProvider`
//! using the OpenSearch Rust client.

use async_trait::async_trait;
use opensearch::{
    cluster::ClusterHealthParts,
    http::request::JsonBody,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    http::response::Response,
    indices::{IndicesCreateParts, IndicesExistsParts},
    BulkParts, OpenSearch,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::SearchIndexConfig;
use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndexProvider;
use crate::opensearch::index_config::IndexDefinition;
use crate::types::{BatchOperationResult, BatchOperationSummary};
use catalog_indexer_shared::IndexDocument;

/// OpenSearch client implementation.
///
/// Writes catalog documents into OpenSearch (or an Elasticsearch-compatible
/// cluster) through the bulk API.
///
/// # Example
///
/// ```ignore
/// use catalog_indexer_repository::{OpenSearchClient, SearchIndexConfig, SearchIndexProvider};
///
/// let client = OpenSearchClient::new(&SearchIndexConfig::new("http://localhost:9200"))?;
/// let summary = client.bulk_index_documents("movies", &documents).await?;
/// println!("{} indexed, {} failed", summary.succeeded, summary.failed);
/// ```
pub struct OpenSearchClient {
    client: OpenSearch,
    config: SearchIndexConfig,
}

impl OpenSearchClient {
    /// Create a new OpenSearch client for the configured URL.
    ///
    /// No request is sent; use [`SearchIndexProvider::health_check`] to verify
    /// the cluster is reachable.
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchClient)` - A new client instance
    /// * `Err(SearchIndexError)` - If the URL is invalid or transport setup fails
    pub fn new(config: &SearchIndexConfig) -> Result<Self, SearchIndexError> {
        let parsed_url = Url::parse(&config.url)
            .map_err(|e| SearchIndexError::validation(format!("invalid search URL '{}': {}", config.url, e)))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(
            url = %config.url,
            timeout_ms = config.request_timeout.as_millis() as u64,
            "Created OpenSearch client"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Check if batch size exceeds the configured limit.
    fn validate_batch_size(&self, size: usize) -> Result<(), SearchIndexError> {
        if let Some(max) = self.config.max_batch_size {
            if size > max {
                return Err(SearchIndexError::batch_size_exceeded(size, max));
            }
        }
        Ok(())
    }

    /// Turn a non-success response into an error, consuming its body.
    async fn status_error(
        response: Response,
        otherwise: fn(String) -> SearchIndexError,
    ) -> SearchIndexError {
        let status = response.status_code().as_u16();
        let body = response.text().await.unwrap_or_default();
        SearchIndexError::from_status(status, body, otherwise)
    }

    /// Map the per-item results of a bulk response back to documents.
    ///
    /// Items come back in request order; the item's own `_id` is preferred
    /// and the request position is the fallback.
    fn parse_bulk_response(
        document_ids: &[String],
        body: &Value,
    ) -> Result<Vec<BatchOperationResult>, SearchIndexError> {
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| SearchIndexError::parse("bulk response has no 'items' array"))?;

        if items.len() != document_ids.len() {
            warn!(
                expected = document_ids.len(),
                received = items.len(),
                "Bulk response item count does not match request"
            );
        }

        let results = items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let action = item
                    .get("index")
                    .or_else(|| item.as_object().and_then(|o| o.values().next()));
                let document_id = action
                    .and_then(|a| a.get("_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| document_ids.get(position).cloned())
                    .unwrap_or_default();
                let status = action
                    .and_then(|a| a.get("status"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);

                match action.and_then(|a| a.get("error")) {
                    Some(item_error) => BatchOperationResult::failed(
                        document_id,
                        SearchIndexError::index(Self::describe_item_error(item_error)),
                    ),
                    None if (200..300).contains(&status) => {
                        BatchOperationResult::succeeded(document_id)
                    }
                    None => BatchOperationResult::failed(
                        document_id,
                        SearchIndexError::index(format!("unexpected item status {}", status)),
                    ),
                }
            })
            .collect();

        Ok(results)
    }

    fn describe_item_error(item_error: &Value) -> String {
        match (
            item_error.get("type").and_then(Value::as_str),
            item_error.get("reason").and_then(Value::as_str),
        ) {
            (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
            (Some(kind), None) => kind.to_string(),
            _ => item_error.to_string(),
        }
    }
}

#[async_trait]
impl SearchIndexProvider for OpenSearchClient {
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::status_error(response, SearchIndexError::IndexError).await),
        }
    }

    #[instrument(skip(self, definition), fields(index = %definition.name))]
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&definition.name))
            .body(definition.body())
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if status.is_success() {
            info!("Index created");
            return Ok(());
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        if code == 400 && body.contains("resource_already_exists_exception") {
            debug!("Index was created concurrently");
            return Ok(());
        }

        error!(status = code, body = %body, "Index creation failed");
        Err(SearchIndexError::from_status(
            code,
            body,
            SearchIndexError::IndexCreationError,
        ))
    }

    /// Index documents through the `_bulk` endpoint.
    ///
    /// Documents that cannot be serialized are reported as failed without
    /// being sent; the remaining documents still go out in one request.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn bulk_index_documents(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        if documents.is_empty() {
            return Ok(BatchOperationSummary::default());
        }

        self.validate_batch_size(documents.len())?;

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(documents.len() * 2);
        let mut document_ids = Vec::with_capacity(documents.len());
        let mut results = Vec::new();

        for doc in documents {
            let doc_id = doc.id().to_string();
            match serde_json::to_value(doc) {
                Ok(source) => {
                    body.push(json!({"index": {"_index": index, "_id": doc_id}}).into());
                    body.push(source.into());
                    document_ids.push(doc_id);
                }
                Err(e) => {
                    warn!(document_id = %doc_id, error = %e, "Skipping unserializable document");
                    results.push(BatchOperationResult::failed(
                        doc_id,
                        SearchIndexError::serialization(e.to_string()),
                    ));
                }
            }
        }

        if !document_ids.is_empty() {
            let response = self
                .client
                .bulk(BulkParts::Index(index))
                .body(body)
                .send()
                .await
                .map_err(|e| SearchIndexError::connection(e.to_string()))?;

            if !response.status_code().is_success() {
                return Err(Self::status_error(response, SearchIndexError::BulkOperationError).await);
            }

            let response_body: Value = response
                .json()
                .await
                .map_err(|e| SearchIndexError::parse(e.to_string()))?;

            results.extend(Self::parse_bulk_response(&document_ids, &response_body)?);
        }

        let summary = BatchOperationSummary::from_results(results);
        debug!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Bulk request completed"
        );
        Ok(summary)
    }

    async fn health_check(&self) -> Result<bool, SearchIndexError> {
        let response = self
            .client
            .cluster()
            .health(ClusterHealthParts::None)
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        if !response.status_code().is_success() {
            return Err(Self::status_error(response, SearchIndexError::IndexError).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;

        let status = body.get("status").and_then(Value::as_str).unwrap_or("red");
        debug!(cluster_status = %status, "Cluster health");
        Ok(matches!(status, "green" | "yellow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let result = OpenSearchClient::new(&SearchIndexConfig::new("not a url"));
        assert!(matches!(result, Err(SearchIndexError::ValidationError(_))));
    }

    #[test]
    fn test_new_accepts_valid_url() {
        assert!(OpenSearchClient::new(&SearchIndexConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_batch_size() {
        let client =
            OpenSearchClient::new(&SearchIndexConfig::default().with_max_batch_size(2)).unwrap();

        assert!(client.validate_batch_size(2).is_ok());
        assert!(matches!(
            client.validate_batch_size(3),
            Err(SearchIndexError::BatchSizeExceeded { provided: 3, max: 2 })
        ));
    }

    #[test]
    fn test_parse_bulk_response_all_ok() {
        let body = json!({
            "took": 3,
            "errors": false,
            "items": [
                {"index": {"_id": "a", "status": 201, "result": "created"}},
                {"index": {"_id": "b", "status": 200, "result": "updated"}}
            ]
        });

        let results = OpenSearchClient::parse_bulk_response(&ids(&["a", "b"]), &body).unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[1].document_id, "b");
    }

    #[test]
    fn test_parse_bulk_response_partial_failure() {
        let body = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 201}},
                {"index": {"_id": "b", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [imdb_rating]"
                }}},
                {"index": {"_id": "c", "status": 201}}
            ]
        });

        let summary = BatchOperationSummary::from_results(
            OpenSearchClient::parse_bulk_response(&ids(&["a", "b", "c"]), &body).unwrap(),
        );

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        let failure = summary.failures().next().unwrap();
        assert_eq!(failure.document_id, "b");
        assert!(matches!(
            failure.error,
            Some(SearchIndexError::IndexError(ref msg)) if msg.starts_with("mapper_parsing_exception")
        ));
    }

    #[test]
    fn test_parse_bulk_response_falls_back_to_position() {
        let body = json!({"items": [{"index": {"status": 200}}]});

        let results = OpenSearchClient::parse_bulk_response(&ids(&["only"]), &body).unwrap();

        assert_eq!(results[0].document_id, "only");
        assert!(results[0].success);
    }

    #[test]
    fn test_parse_bulk_response_without_items() {
        let result = OpenSearchClient::parse_bulk_response(&ids(&["a"]), &json!({"errors": false}));
        assert!(matches!(result, Err(SearchIndexError::ParseError(_))));
    }
}
