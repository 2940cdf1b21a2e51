//! Fan-out enricher: turns changed genres or people into the films that
//! reference them.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::retry::RetryPolicy;
use crate::source::{CatalogSource, PageCursor, Relation, SourceError};
use crate::state::{format_timestamp, Checkpoint};
use catalog_indexer_shared::{epoch_min, ChangedRow};

/// Sweeps the films linked to one batch of secondary ids.
///
/// Every sweep starts at the beginning of the film table. The enricher
/// watermark follows the last film of each consumed page and goes back to
/// the epoch minimum when the sweep completes. It is never used to resume:
/// the ids of the next run's first producer page need not match the ids of
/// an interrupted sweep, so a leftover value is discarded.
pub struct FilmEnricher {
    source: Arc<dyn CatalogSource>,
    relation: Relation,
    checkpoint: Checkpoint,
    batch_size: usize,
    retry: RetryPolicy,
    ids: Vec<Uuid>,
    cursor: PageCursor,
    pending: Option<DateTime<Utc>>,
    active: bool,
    drained: bool,
    started: bool,
}

impl FilmEnricher {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        relation: Relation,
        checkpoint: Checkpoint,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            relation,
            checkpoint,
            batch_size: batch_size.max(1),
            retry,
            ids: Vec::new(),
            cursor: PageCursor::after(epoch_min()),
            pending: None,
            active: false,
            drained: false,
            started: false,
        }
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// The stored progress of the current sweep.
    pub fn watermark(&self) -> DateTime<Utc> {
        self.checkpoint.current()
    }

    /// Start a sweep over the films linked to `ids`.
    pub fn begin(&mut self, ids: Vec<Uuid>) {
        self.cursor = PageCursor::after(epoch_min());
        self.pending = None;
        self.active = !ids.is_empty();
        self.drained = false;
        self.started = false;
        self.ids = ids;
    }

    /// Commit the previous page, then fetch the next page of linked films.
    ///
    /// Returns `None` when the sweep is complete, after resetting the
    /// watermark.
    #[instrument(skip(self), fields(relation = self.relation.table_name(), ids = self.ids.len()))]
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ChangedRow>>, PipelineError> {
        if !self.active {
            return Ok(None);
        }

        if !self.started {
            let leftover = self.checkpoint.current();
            if leftover > epoch_min() {
                info!(
                    watermark = %format_timestamp(leftover),
                    "Discarding progress of an interrupted sweep"
                );
                self.checkpoint.reset().await?;
            }
            self.started = true;
        }

        if let Some(modified) = self.pending.take() {
            if let Err(e) = self.checkpoint.advance(modified).await {
                self.pending = Some(modified);
                return Err(e.into());
            }
        }

        let rows = if self.drained {
            Vec::new()
        } else {
            let source = &self.source;
            let ids = self.ids.as_slice();
            let cursor = &self.cursor;
            let (relation, limit) = (self.relation, self.batch_size);
            self.retry
                .run(
                    "film enrichment",
                    move || source.linked_filmworks(relation, ids, cursor, limit),
                    SourceError::is_transient,
                )
                .await?
        };

        let Some(last) = rows.last() else {
            self.checkpoint.reset().await?;
            self.active = false;
            debug!("Enrichment sweep complete");
            return Ok(None);
        };

        self.cursor.advance_past(last);
        self.pending = Some(last.modified);
        if rows.len() < self.batch_size {
            self.drained = true;
        }

        debug!(films = rows.len(), "Enriched batch");
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FilmRecord, MemoryCatalog, PersonRecord};
    use crate::state::{CheckpointStore, MemoryStore};
    use catalog_indexer_shared::epoch_min;
    use chrono::TimeZone;
    use std::time::Duration;

    const KEY: &str = "filmwork_by_person_etl_enricher_last_modified";

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// Person 100 plays in films 1..=3, person 200 directs film 1.
    async fn catalog() -> Arc<MemoryCatalog> {
        let catalog = Arc::new(MemoryCatalog::new());
        for n in 1..=4u128 {
            catalog
                .upsert_film(FilmRecord {
                    id: id(n),
                    title: Some(format!("Film {}", n)),
                    description: None,
                    rating: None,
                    modified: ts(n as i64 * 10),
                })
                .await;
        }
        for person in [100u128, 200] {
            catalog
                .upsert_person(PersonRecord {
                    id: id(person),
                    full_name: Some(format!("Person {}", person)),
                    modified: ts(100),
                })
                .await;
        }
        for film in 1..=3u128 {
            catalog.link_person(id(film), id(100), "actor").await;
        }
        catalog.link_person(id(1), id(200), "director").await;
        catalog
    }

    async fn enricher(catalog: Arc<MemoryCatalog>, store: Arc<MemoryStore>, batch_size: usize) -> FilmEnricher {
        let retry = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1));
        let checkpoint = Checkpoint::load(store, KEY, retry).await.unwrap();
        FilmEnricher::new(catalog, Relation::Person, checkpoint, batch_size, retry)
    }

    #[tokio::test]
    async fn test_sweep_is_scoped_to_linked_films() {
        let store = Arc::new(MemoryStore::new());
        let mut enricher = enricher(catalog().await, store, 10).await;

        enricher.begin(vec![id(100)]);
        let films = enricher.next_batch().await.unwrap().unwrap();

        assert_eq!(films.iter().map(|r| r.id).collect::<Vec<_>>(), vec![id(1), id(2), id(3)]);
        assert!(enricher.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watermark_advances_then_resets() {
        let store = Arc::new(MemoryStore::new());
        let mut enricher = enricher(catalog().await, store.clone(), 2).await;

        enricher.begin(vec![id(100)]);
        enricher.next_batch().await.unwrap().unwrap();
        assert_eq!(store.get(KEY).await.unwrap(), Some(epoch_min()));

        enricher.next_batch().await.unwrap().unwrap();
        assert_eq!(store.get(KEY).await.unwrap(), Some(ts(20)));

        assert!(enricher.next_batch().await.unwrap().is_none());
        assert_eq!(store.get(KEY).await.unwrap(), Some(epoch_min()));
    }

    #[tokio::test]
    async fn test_next_sweep_starts_from_the_beginning() {
        let store = Arc::new(MemoryStore::new());
        let mut enricher = enricher(catalog().await, store, 10).await;

        enricher.begin(vec![id(100)]);
        while enricher.next_batch().await.unwrap().is_some() {}

        // Film 1 is older than the last film of the previous sweep.
        enricher.begin(vec![id(200)]);
        let films = enricher.next_batch().await.unwrap().unwrap();
        assert_eq!(films[0].id, id(1));
    }

    #[tokio::test]
    async fn test_interrupted_sweep_starts_over() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog().await;

        let mut first = enricher(catalog.clone(), store.clone(), 1).await;
        first.begin(vec![id(100)]);
        first.next_batch().await.unwrap();
        first.next_batch().await.unwrap();
        drop(first);
        assert_eq!(store.get(KEY).await.unwrap(), Some(ts(10)));

        // The next run's page holds other ids; film 1 is older than the
        // stored progress.
        let mut second = enricher(catalog, store.clone(), 1).await;
        second.begin(vec![id(200)]);
        let films = second.next_batch().await.unwrap().unwrap();

        assert_eq!(films[0].id, id(1));
        assert_eq!(store.get(KEY).await.unwrap(), Some(epoch_min()));
    }

    #[tokio::test]
    async fn test_empty_ids_yield_nothing() {
        let store = Arc::new(MemoryStore::new());
        let catalog = catalog().await;
        let mut enricher = enricher(catalog.clone(), store, 10).await;
        let before = catalog.query_count();

        enricher.begin(Vec::new());

        assert!(enricher.next_batch().await.unwrap().is_none());
        assert_eq!(catalog.query_count(), before);
    }
}
