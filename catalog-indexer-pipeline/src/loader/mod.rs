//! Loader module for the indexing pipeline.
//!
//! Creates the target indices and uploads documents in bulk.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::errors::PipelineError;
use crate::retry::RetryPolicy;
use catalog_indexer_repository::{
    BatchOperationSummary, IndexDefinition, SearchIndexError, SearchIndexProvider,
};
use catalog_indexer_shared::IndexDocument;

/// Default number of documents per bulk request.
pub const DEFAULT_LOADER_BATCH_SIZE: usize = 128;

/// Outcome of one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Bulk requests sent.
    pub requests: usize,
    /// Documents indexed.
    pub succeeded: usize,
    /// Documents the search engine rejected.
    pub failed: usize,
}

impl LoadReport {
    fn record(&mut self, summary: &BatchOperationSummary) {
        self.requests += 1;
        self.succeeded += summary.succeeded;
        self.failed += summary.failed;
    }
}

/// Loader that writes documents into the search engine.
///
/// Document-level rejections are logged and counted. Transport failures are
/// retried with backoff and, once the retries are spent, abort the upload.
pub struct IndexLoader {
    provider: Arc<dyn SearchIndexProvider>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl IndexLoader {
    /// Create a new loader with the default batch size and retry policy.
    pub fn new(provider: Arc<dyn SearchIndexProvider>) -> Self {
        Self::with_config(provider, DEFAULT_LOADER_BATCH_SIZE, RetryPolicy::default())
    }

    /// Create a new loader with a custom batch size and retry policy.
    pub fn with_config(
        provider: Arc<dyn SearchIndexProvider>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Create the index described by `definition` unless it already exists.
    ///
    /// Returns whether the index was created.
    #[instrument(skip(self, definition), fields(index = %definition.name))]
    pub async fn ensure_index(&self, definition: &IndexDefinition) -> Result<bool, PipelineError> {
        let provider = &self.provider;
        let name = definition.name.as_str();

        let exists = self
            .retry
            .run("index lookup", move || provider.index_exists(name), SearchIndexError::is_transient)
            .await?;
        if exists {
            debug!("Index already exists");
            return Ok(false);
        }

        self.retry
            .run(
                "index creation",
                move || provider.create_index(definition),
                SearchIndexError::is_transient,
            )
            .await?;
        info!("Created index");
        Ok(true)
    }

    /// Upload `documents` to `index` in bulk requests of the loader batch size.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub async fn upload(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<LoadReport, PipelineError> {
        let mut report = LoadReport::default();

        for chunk in documents.chunks(self.batch_size) {
            let provider = &self.provider;
            let summary = self
                .retry
                .run(
                    "bulk upload",
                    move || provider.bulk_index_documents(index, chunk),
                    SearchIndexError::is_transient,
                )
                .await?;

            for failure in summary.failures() {
                warn!(
                    document_id = %failure.document_id,
                    error = ?failure.error,
                    "Document rejected"
                );
            }
            report.record(&summary);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            requests = report.requests,
            "Uploaded documents"
        );
        Ok(report)
    }

    /// Check if the search engine is healthy.
    pub async fn health_check(&self) -> Result<bool, PipelineError> {
        let provider = &self.provider;
        self.retry
            .run("search health check", move || provider.health_check(), SearchIndexError::is_transient)
            .await
            .map_err(PipelineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_indexer_repository::BatchOperationResult;
    use catalog_indexer_shared::GenreDocument;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Mock search client for testing.
    #[derive(Default)]
    struct MockSearchClient {
        exists: bool,
        created_count: AtomicUsize,
        bulk_calls: AtomicUsize,
        indexed_count: AtomicUsize,
        transient_failures: AtomicUsize,
        reject_id: Option<String>,
    }

    #[async_trait]
    impl SearchIndexProvider for MockSearchClient {
        async fn index_exists(&self, _index: &str) -> Result<bool, SearchIndexError> {
            Ok(self.exists)
        }

        async fn create_index(&self, _definition: &IndexDefinition) -> Result<(), SearchIndexError> {
            self.created_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn bulk_index_documents(
            &self,
            _index: &str,
            documents: &[IndexDocument],
        ) -> Result<BatchOperationSummary, SearchIndexError> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SearchIndexError::unavailable(503, "busy"));
            }

            let results = documents
                .iter()
                .map(|doc| {
                    let id = doc.id().to_string();
                    if self.reject_id.as_deref() == Some(id.as_str()) {
                        BatchOperationResult::failed(id, SearchIndexError::index("mapper_parsing_exception"))
                    } else {
                        self.indexed_count.fetch_add(1, Ordering::SeqCst);
                        BatchOperationResult::succeeded(id)
                    }
                })
                .collect();
            Ok(BatchOperationSummary::from_results(results))
        }

        async fn health_check(&self) -> Result<bool, SearchIndexError> {
            Ok(true)
        }
    }

    fn genres(count: u128) -> Vec<IndexDocument> {
        (1..=count)
            .map(|n| {
                GenreDocument {
                    id: Uuid::from_u128(n),
                    name: format!("Genre {}", n),
                    description: None,
                }
                .into()
            })
            .collect()
    }

    fn definition() -> IndexDefinition {
        IndexDefinition::new("genres", json!({"properties": {}}), json!({})).unwrap()
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(10), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_upload_in_chunks() {
        let client = Arc::new(MockSearchClient::default());
        let loader = IndexLoader::with_config(client.clone(), 2, fast_retry(1));

        let report = loader.upload("genres", &genres(5)).await.unwrap();

        assert_eq!(report, LoadReport { requests: 3, succeeded: 5, failed: 0 });
        assert_eq!(client.indexed_count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_partial_failure_is_counted() {
        let client = Arc::new(MockSearchClient {
            reject_id: Some(Uuid::from_u128(2).to_string()),
            ..MockSearchClient::default()
        });
        let loader = IndexLoader::with_config(client.clone(), 10, fast_retry(1));

        let report = loader.upload("genres", &genres(3)).await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_retried() {
        let client = Arc::new(MockSearchClient {
            transient_failures: AtomicUsize::new(2),
            ..MockSearchClient::default()
        });
        let loader = IndexLoader::with_config(client.clone(), 10, fast_retry(3));

        let report = loader.upload("genres", &genres(1)).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(client.bulk_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_surface_after_retries() {
        let client = Arc::new(MockSearchClient {
            transient_failures: AtomicUsize::new(10),
            ..MockSearchClient::default()
        });
        let loader = IndexLoader::with_config(client.clone(), 10, fast_retry(2));

        let err = loader.upload("genres", &genres(1)).await.unwrap_err();

        assert!(matches!(err, PipelineError::LoaderError(SearchIndexError::Unavailable { status: 503, .. })));
        assert_eq!(client.bulk_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ensure_index_does_not_recreate() {
        let existing = Arc::new(MockSearchClient {
            exists: true,
            ..MockSearchClient::default()
        });
        let loader = IndexLoader::new(existing.clone());
        assert!(!loader.ensure_index(&definition()).await.unwrap());
        assert_eq!(existing.created_count.load(Ordering::SeqCst), 0);

        let missing = Arc::new(MockSearchClient::default());
        let loader = IndexLoader::new(missing.clone());
        assert!(loader.ensure_index(&definition()).await.unwrap());
        assert_eq!(missing.created_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_nothing() {
        let client = Arc::new(MockSearchClient::default());
        let loader = IndexLoader::new(client.clone());

        let report = loader.upload("genres", &[]).await.unwrap();

        assert_eq!(report, LoadReport::default());
        assert_eq!(client.bulk_calls.load(Ordering::SeqCst), 0);
    }
}
