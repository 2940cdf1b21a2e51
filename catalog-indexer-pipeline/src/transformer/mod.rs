//! Document transformer.
//!
//! Turns the flat row-set of a [`MergedBatch`] into one document per entity:
//! rows are grouped by id in first-seen order, related collections are
//! deduplicated by id and sorted by name, and people are split by role.
//! Malformed rows never fail a batch; they are logged, skipped and counted.

mod filmwork;
mod genre;
mod person;

use tracing::{debug, instrument};

use crate::merger::MergedBatch;
use catalog_indexer_shared::{IndexDocument, NamedEntity};

/// Documents built from one batch, plus the number of skipped rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    pub documents: Vec<IndexDocument>,
    /// Entities or relations dropped because a required field was missing.
    pub skipped: usize,
}

/// Builds search documents from merged rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTransformer;

impl DocumentTransformer {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, batch), fields(kind = %batch.kind(), rows = batch.len()))]
    pub fn transform(&self, batch: MergedBatch) -> TransformOutput {
        let output = match batch {
            MergedBatch::Filmwork(rows) => filmwork::build(rows),
            MergedBatch::Genre(rows) => genre::build(rows),
            MergedBatch::Person(rows) => person::build(rows),
        };
        debug!(
            documents = output.documents.len(),
            skipped = output.skipped,
            "Transformed batch"
        );
        output
    }
}

/// A display name that is present and not blank.
fn display_name(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

/// Deduplicate by id, keeping the first occurrence, then sort by name with
/// ties broken by id.
fn sorted_unique(mut entities: Vec<NamedEntity>) -> Vec<NamedEntity> {
    let mut seen = std::collections::HashSet::with_capacity(entities.len());
    entities.retain(|e| seen.insert(e.id));
    entities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    entities
}
