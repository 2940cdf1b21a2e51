//! Search index provider trait definition.
//!
//! This module defines the abstract interface for search index operations,
//! allowing for different backend implementations (OpenSearch, Elasticsearch, etc.).

use async_trait::async_trait;

use crate::errors::SearchIndexError;
use crate::opensearch::IndexDefinition;
use crate::types::BatchOperationSummary;
use catalog_indexer_shared::IndexDocument;

/// Abstracts the underlying search index implementation (OpenSearch, Elasticsearch, etc.).
///
/// Implementations are injected into the loader to enable dependency
/// injection and easy testing with mock implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// All methods return `Result<T, SearchIndexError>`. Callers decide whether to
/// retry by checking [`SearchIndexError::is_transient`].
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    /// Check whether an index exists.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the index exists
    /// * `Ok(false)` - If it does not
    /// * `Err(SearchIndexError)` - If the check could not be performed
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError>;

    /// Create an index from its mapping and settings.
    ///
    /// Creating an index that already exists is treated as success, so two
    /// racing creators do not fail each other.
    ///
    /// # Arguments
    ///
    /// * `definition` - The index name with its mappings and settings
    async fn create_index(&self, definition: &IndexDefinition) -> Result<(), SearchIndexError>;

    /// Index multiple documents in bulk and return a summary of successful and failed operations.
    ///
    /// Each document replaces any previous document with the same id. The
    /// summary reports document-level failures; an `Err` means the bulk
    /// request as a whole did not go through.
    ///
    /// # Arguments
    ///
    /// * `index` - Target index name
    /// * `documents` - Documents to index
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOperationSummary)` - Contains aggregate statistics and individual results
    /// * `Err(SearchIndexError)` - If the bulk operation fails entirely
    async fn bulk_index_documents(
        &self,
        index: &str,
        documents: &[IndexDocument],
    ) -> Result<BatchOperationSummary, SearchIndexError>;

    /// Check if the search engine is healthy and reachable.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the cluster status is green or yellow
    /// * `Ok(false)` - If the cluster reports red
    /// * `Err(SearchIndexError)` - If the health check fails to execute
    async fn health_check(&self) -> Result<bool, SearchIndexError>;
}
