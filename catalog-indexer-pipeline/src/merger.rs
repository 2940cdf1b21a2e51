//! Join merger: fetches everything needed to build the documents of a batch.

use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::retry::RetryPolicy;
use crate::source::{CatalogSource, SourceError};
use catalog_indexer_shared::{EntityKind, FilmworkRow, GenreRow, PersonFilmRow};

/// Flat row-set for one batch of ids, ready for the transformer.
#[derive(Debug, Clone, PartialEq)]
pub enum MergedBatch {
    Filmwork(Vec<FilmworkRow>),
    Genre(Vec<GenreRow>),
    Person(Vec<PersonFilmRow>),
}

impl MergedBatch {
    fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Filmwork => MergedBatch::Filmwork(Vec::new()),
            EntityKind::Genre => MergedBatch::Genre(Vec::new()),
            EntityKind::Person => MergedBatch::Person(Vec::new()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            MergedBatch::Filmwork(_) => EntityKind::Filmwork,
            MergedBatch::Genre(_) => EntityKind::Genre,
            MergedBatch::Person(_) => EntityKind::Person,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MergedBatch::Filmwork(rows) => rows.len(),
            MergedBatch::Genre(rows) => rows.len(),
            MergedBatch::Person(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn extend(&mut self, other: MergedBatch) {
        match (self, other) {
            (MergedBatch::Filmwork(rows), MergedBatch::Filmwork(more)) => rows.extend(more),
            (MergedBatch::Genre(rows), MergedBatch::Genre(more)) => rows.extend(more),
            (MergedBatch::Person(rows), MergedBatch::Person(more)) => rows.extend(more),
            _ => {}
        }
    }
}

/// Stateless fetcher for the rows of one entity kind.
///
/// Ids are queried in chunks of `batch_size`; the chunks' rows are
/// concatenated in order.
pub struct JoinMerger {
    source: Arc<dyn CatalogSource>,
    kind: EntityKind,
    batch_size: usize,
    retry: RetryPolicy,
}

impl JoinMerger {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        kind: EntityKind,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            kind,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    #[instrument(skip(self, ids), fields(kind = %self.kind, ids = ids.len()))]
    pub async fn merge(&self, ids: &[Uuid]) -> Result<MergedBatch, PipelineError> {
        let mut merged = MergedBatch::empty(self.kind);
        for chunk in ids.chunks(self.batch_size) {
            merged.extend(self.merge_chunk(chunk).await?);
        }
        debug!(rows = merged.len(), "Merged batch");
        Ok(merged)
    }

    async fn merge_chunk(&self, ids: &[Uuid]) -> Result<MergedBatch, SourceError> {
        let source = &self.source;
        match self.kind {
            EntityKind::Filmwork => self
                .retry
                .run("film merge", move || source.filmwork_rows(ids), SourceError::is_transient)
                .await
                .map(MergedBatch::Filmwork),
            EntityKind::Genre => self
                .retry
                .run("genre merge", move || source.genre_rows(ids), SourceError::is_transient)
                .await
                .map(MergedBatch::Genre),
            EntityKind::Person => self
                .retry
                .run("person merge", move || source.person_rows(ids), SourceError::is_transient)
                .await
                .map(MergedBatch::Person),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{GenreRecord, MemoryCatalog};
    use chrono::Utc;
    use std::time::Duration;

    async fn genres(count: u128) -> Arc<MemoryCatalog> {
        let catalog = Arc::new(MemoryCatalog::new());
        for n in 1..=count {
            catalog
                .upsert_genre(GenreRecord {
                    id: Uuid::from_u128(n),
                    name: Some(format!("Genre {}", n)),
                    description: None,
                    modified: Utc::now(),
                })
                .await;
        }
        catalog
    }

    #[tokio::test]
    async fn test_merge_chunks_ids() {
        let catalog = genres(5).await;
        let merger = JoinMerger::new(catalog.clone(), EntityKind::Genre, 2, RetryPolicy::no_retry());
        let ids: Vec<Uuid> = (1..=5).map(Uuid::from_u128).collect();

        let merged = merger.merge(&ids).await.unwrap();

        assert_eq!(merged.kind(), EntityKind::Genre);
        assert_eq!(merged.len(), 5);
        assert_eq!(catalog.query_count(), 3);
    }

    #[tokio::test]
    async fn test_merge_nothing() {
        let catalog = genres(1).await;
        let merger = JoinMerger::new(catalog.clone(), EntityKind::Person, 10, RetryPolicy::no_retry());

        let merged = merger.merge(&[]).await.unwrap();

        assert!(merged.is_empty());
        assert_eq!(merged.kind(), EntityKind::Person);
        assert_eq!(catalog.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_retries_then_fails() {
        let catalog = genres(1).await;
        let retry = RetryPolicy::new(2, Duration::from_millis(5), Duration::from_millis(5));
        let merger = JoinMerger::new(catalog.clone(), EntityKind::Genre, 10, retry);

        catalog.fail_next(5);
        let err = merger.merge(&[Uuid::from_u128(1)]).await.unwrap_err();

        assert!(matches!(err, PipelineError::SourceError(SourceError::ConnectionError(_))));
        assert_eq!(catalog.query_count(), 2);
    }
}
