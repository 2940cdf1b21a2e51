//! # Catalog Indexer
//!
//! Main library for the movie catalog search indexer.
//!
//! This crate provides the entry point, configuration and logging setup for
//! running the indexing pipelines.

pub mod config;
pub mod logging;

pub use config::{Dependencies, Settings, StateBackend};
pub use logging::LogFormat;

use catalog_indexer_pipeline::{CheckpointError, SourceError};
use catalog_indexer_repository::SearchIndexError;
use thiserror::Error;
use tracing::info;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] catalog_indexer_pipeline::PipelineError),

    /// Search error.
    #[error("Search error: {0}")]
    SearchError(#[from] SearchIndexError),

    /// Checkpoint store error.
    #[error("Checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// Catalog database error.
    #[error("Source error: {0}")]
    SourceError(#[from] SourceError),

    /// One or more pipelines failed in run-once mode.
    #[error("Pipelines failed: {}", .0.join(", "))]
    RunFailed(Vec<String>),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Build every dependency from `settings` and run the scheduler.
///
/// In run-once mode a single cycle is executed and any failed pipeline turns
/// into an error.
pub async fn run(settings: Settings) -> Result<(), IndexingError> {
    let run_once = settings.run_once;
    let dependencies = Dependencies::new(&settings).await?;

    if !run_once {
        dependencies.scheduler.run().await;
        return Ok(());
    }

    let cycle = dependencies.scheduler.run_once().await;
    info!(
        runs = cycle.runs.len(),
        failures = cycle.failures.len(),
        "Single cycle finished"
    );
    if cycle.failures.is_empty() {
        Ok(())
    } else {
        Err(IndexingError::RunFailed(
            cycle.failures.into_iter().map(|f| f.pipeline).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_failed_lists_pipelines() {
        let err = IndexingError::RunFailed(vec!["person_etl".to_string(), "genre_etl".to_string()]);
        assert_eq!(err.to_string(), "Pipelines failed: person_etl, genre_etl");
    }
}
