//! # Catalog Indexer Repository
//!
//! This crate provides the trait the catalog indexer uses to talk to the
//! search engine, plus a concrete implementation for OpenSearch (which also
//! speaks to Elasticsearch-compatible clusters). It includes the error type,
//! the bulk result types and the on-disk index definitions.

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;

pub use config::SearchIndexConfig;
pub use errors::SearchIndexError;
pub use interfaces::SearchIndexProvider;
pub use opensearch::{IndexDefinition, OpenSearchClient};
pub use types::{BatchOperationResult, BatchOperationSummary};
