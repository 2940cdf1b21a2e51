//! Change producer: pages through rows modified after the stored watermark.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::errors::PipelineError;
use crate::retry::RetryPolicy;
use crate::source::{CatalogSource, PageCursor, SourceError};
use crate::state::{Checkpoint, CheckpointError};
use catalog_indexer_shared::{ChangedRow, EntityKind};

/// Pages of `(id, modified)` for one table, ascending by `(modified, id)`.
///
/// A page's watermark is committed when the caller asks for the next page,
/// so a page that fails downstream is produced again on the next run. Only
/// the timestamp is persisted and a restart resumes at `modified > watermark`,
/// so a timestamp is committed only once no unconsumed row can share it: while
/// the next page starts on the same timestamp the watermark stays at the last
/// strictly older one.
pub struct ChangeProducer {
    source: Arc<dyn CatalogSource>,
    kind: EntityKind,
    checkpoint: Checkpoint,
    batch_size: usize,
    retry: RetryPolicy,
    cursor: PageCursor,
    /// Last timestamp of the page handed out most recently.
    pending: Option<DateTime<Utc>>,
    /// Greatest handed-out timestamp strictly below `pending`.
    settled: Option<DateTime<Utc>>,
    exhausted: bool,
}

impl ChangeProducer {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        kind: EntityKind,
        checkpoint: Checkpoint,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        let cursor = PageCursor::after(checkpoint.current());
        Self {
            source,
            kind,
            checkpoint,
            batch_size: batch_size.max(1),
            retry,
            cursor,
            pending: None,
            settled: None,
            exhausted: false,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The last committed watermark.
    pub fn watermark(&self) -> DateTime<Utc> {
        self.checkpoint.current()
    }

    /// Fetch the next page, commit what the previous one made safe, then hand
    /// the new page out.
    ///
    /// Returns `None` once the table has no rows past the cursor.
    #[instrument(skip(self), fields(table = %self.kind))]
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ChangedRow>>, PipelineError> {
        let rows = if self.exhausted {
            Vec::new()
        } else {
            let source = &self.source;
            let cursor = &self.cursor;
            let (kind, limit) = (self.kind, self.batch_size);
            self.retry
                .run(
                    "change scan",
                    move || source.changed_rows(kind, cursor, limit),
                    SourceError::is_transient,
                )
                .await?
        };

        self.commit(rows.first()).await?;

        let Some(last) = rows.last() else {
            self.exhausted = true;
            self.pending = None;
            self.settled = None;
            return Ok(None);
        };

        let handed = last.modified;
        self.settled = rows
            .iter()
            .map(|row| row.modified)
            .chain(self.pending)
            .chain(self.settled)
            .filter(|modified| *modified < handed)
            .max();
        self.pending = Some(handed);
        self.cursor.advance_past(last);
        if rows.len() < self.batch_size {
            self.exhausted = true;
        }

        debug!(rows = rows.len(), "Produced batch");
        Ok(Some(rows))
    }

    /// Persist the watermark of the pages handed out so far, given the first
    /// row of the page about to be handed out.
    async fn commit(&mut self, next: Option<&ChangedRow>) -> Result<(), CheckpointError> {
        let safe = match (self.pending, next) {
            (Some(last), Some(next)) if next.modified <= last => {
                debug!(%last, "Next page shares the last timestamp");
                self.settled
            }
            (pending, _) => pending,
        };
        if let Some(modified) = safe {
            self.checkpoint.advance(modified).await?;
        }
        Ok(())
    }
}
