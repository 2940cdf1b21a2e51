//! Search index error types.
//!
//! This module defines the error types that can occur during search index operations.

use thiserror::Error;

/// Errors that can occur during search index operations.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Validation error (e.g., an invalid URL or index name).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to reach the search engine (refused, reset, timed out).
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The search engine answered but is temporarily unable to serve (429, 5xx).
    #[error("Search engine unavailable (status {status}): {body}")]
    Unavailable { status: u16, body: String },

    /// Failed to index a document.
    #[error("Index error: {0}")]
    IndexError(String),

    /// Failed to create the search index.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to load an index definition from disk.
    #[error("Index definition error: {0}")]
    DefinitionError(String),

    /// Bulk operation was rejected as a whole.
    #[error("Bulk operation error: {0}")]
    BulkOperationError(String),

    /// Failed to parse a response from the search engine.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize a document.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Batch size exceeds configured maximum.
    #[error("Batch size {provided} exceeds maximum {max}")]
    BatchSizeExceeded { provided: usize, max: usize },
}

impl SearchIndexError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create an unavailable error from an HTTP status and response body.
    pub fn unavailable(status: u16, body: impl Into<String>) -> Self {
        Self::Unavailable {
            status,
            body: body.into(),
        }
    }

    /// Create an index error.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::IndexError(msg.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create an index definition error.
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::DefinitionError(msg.into())
    }

    /// Create a bulk operation error.
    pub fn bulk_operation(msg: impl Into<String>) -> Self {
        Self::BulkOperationError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Create a batch size exceeded error.
    pub fn batch_size_exceeded(provided: usize, max: usize) -> Self {
        Self::BatchSizeExceeded { provided, max }
    }

    /// Build the error for a non-success HTTP status.
    ///
    /// Throttling and server-side failures map to [`SearchIndexError::Unavailable`],
    /// everything else is reported through `otherwise`.
    pub fn from_status(status: u16, body: String, otherwise: fn(String) -> Self) -> Self {
        if status == 429 || (500..600).contains(&status) {
            Self::unavailable(status, body)
        } else {
            otherwise(format!("status {}: {}", status, body))
        }
    }

    /// Whether the failure is transient and the request may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchIndexError::ConnectionError(_)
            | SearchIndexError::Unavailable { .. }
            // The response stream may have been cut mid-body.
            | SearchIndexError::ParseError(_) => true,
            SearchIndexError::ValidationError(_)
            | SearchIndexError::IndexError(_)
            | SearchIndexError::IndexCreationError(_)
            | SearchIndexError::DefinitionError(_)
            | SearchIndexError::BulkOperationError(_)
            | SearchIndexError::SerializationError(_)
            | SearchIndexError::BatchSizeExceeded { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SearchIndexError::connection("refused").is_transient());
        assert!(SearchIndexError::unavailable(503, "").is_transient());
        assert!(SearchIndexError::parse("eof").is_transient());
        assert!(!SearchIndexError::validation("bad url").is_transient());
        assert!(!SearchIndexError::index("mapper_parsing_exception").is_transient());
        assert!(!SearchIndexError::batch_size_exceeded(10, 5).is_transient());
    }

    #[test]
    fn test_from_status() {
        let throttled = SearchIndexError::from_status(429, "slow down".into(), SearchIndexError::IndexError);
        assert!(matches!(throttled, SearchIndexError::Unavailable { status: 429, .. }));

        let server = SearchIndexError::from_status(502, String::new(), SearchIndexError::IndexError);
        assert!(server.is_transient());

        let client = SearchIndexError::from_status(400, "bad".into(), SearchIndexError::IndexCreationError);
        assert!(matches!(client, SearchIndexError::IndexCreationError(ref msg) if msg.contains("400")));
        assert!(!client.is_transient());
    }
}
