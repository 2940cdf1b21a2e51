//! Error types for the indexing pipeline.

use thiserror::Error;

use crate::source::SourceError;
use crate::state::CheckpointError;
use catalog_indexer_repository::SearchIndexError;

/// Errors that abort a pipeline run.
///
/// Document-level failures never surface here; they are counted in the run
/// report. A `PipelineError` means the run stopped and its watermark was left
/// at the last fully handed-off batch.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Reading from the catalog failed.
    #[error("Source error: {0}")]
    SourceError(#[from] SourceError),

    /// Reading or writing a watermark failed.
    #[error("Checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// The search engine rejected a request or could not be reached.
    #[error("Loader error: {0}")]
    LoaderError(#[from] SearchIndexError),

    /// The pipeline was wired inconsistently.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl PipelineError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the underlying failure is transient.
    ///
    /// A run that failed transiently is expected to succeed on the next
    /// scheduler cycle without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::SourceError(e) => e.is_transient(),
            PipelineError::CheckpointError(e) => e.is_transient(),
            PipelineError::LoaderError(e) => e.is_transient(),
            PipelineError::ConfigError(_) => false,
        }
    }
}
