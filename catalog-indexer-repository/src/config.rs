//! Configuration types for the search index client.

use std::time::Duration;

/// Default OpenSearch URL.
pub const DEFAULT_SEARCH_URL: &str = "http://127.0.0.1:9200";

/// Configuration for the search index client.
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Base URL of the search cluster.
    pub url: String,
    /// Timeout applied to every request sent to the cluster.
    pub request_timeout: Duration,
    /// Maximum number of documents allowed in a single bulk request.
    pub max_batch_size: Option<usize>,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SEARCH_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            max_batch_size: Some(1000),
        }
    }
}

impl SearchIndexConfig {
    /// Create a config for the given cluster URL with default limits.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set a custom bulk size limit.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = Some(max_batch_size);
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
