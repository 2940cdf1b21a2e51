//! # Catalog Indexer Pipeline
//!
//! This crate provides the pipeline components for copying changed rows of
//! the movie catalog from Postgres into the search indices.
//!
//! ## Architecture
//!
//! Every pipeline follows the Extract-Transform-Load pattern:
//!
//! 1. **Producer**: Pages through rows changed since the last checkpoint
//! 2. **Enricher**: Fans changed genres or people out to the films that reference them
//! 3. **Merger**: Joins the affected entities with their relations
//! 4. **Transformer**: Builds one search document per entity
//! 5. **Loader**: Bulk-indexes documents into OpenSearch
//!
//! Watermarks live in a [`CheckpointStore`] and only advance after a batch has
//! been handed on, so an interrupted run resumes without losing changes. The
//! [`Scheduler`] runs every pipeline in turn, then sleeps.

pub mod enricher;
pub mod errors;
pub mod loader;
pub mod merger;
pub mod pipeline;
pub mod producer;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod transformer;

pub use errors::PipelineError;
pub use loader::{IndexLoader, LoadReport};
pub use pipeline::{BatchSizes, Pipeline, PipelineSpec, RunReport};
pub use retry::RetryPolicy;
pub use scheduler::{CycleReport, PipelineFailure, Scheduler, SchedulerConfig};
pub use source::{CatalogSource, MemoryCatalog, PgCatalogSource, PostgresConfig, SourceError};
pub use state::{CheckpointError, CheckpointStore, JsonFileStore, MemoryStore, RedisStore};
