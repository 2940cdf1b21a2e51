//! One extract-transform-load run.
//!
//! `EXTRACT -> (ENRICH) -> MERGE -> TRANSFORM -> LOAD`, looping until the
//! producer has no more changed rows.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::enricher::FilmEnricher;
use crate::errors::PipelineError;
use crate::loader::IndexLoader;
use crate::merger::JoinMerger;
use crate::producer::ChangeProducer;
use crate::retry::RetryPolicy;
use crate::source::{CatalogSource, Relation};
use crate::state::{checkpoint_key, format_timestamp, Checkpoint, CheckpointStore, Stage};
use crate::transformer::DocumentTransformer;
use catalog_indexer_repository::IndexDefinition;
use catalog_indexer_shared::EntityKind;

/// Default size of producer, enricher and merger batches.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// What a pipeline reads and what it writes.
///
/// When `source` and `target` differ the pipeline enriches: changed rows of
/// `source` are fanned out to the `target` films that reference them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub name: String,
    pub source: EntityKind,
    pub target: EntityKind,
}

impl PipelineSpec {
    pub fn new(name: impl Into<String>, source: EntityKind, target: EntityKind) -> Self {
        Self {
            name: name.into(),
            source,
            target,
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.source != self.target
    }

    /// The index documents are written to.
    pub fn index_name(&self) -> &'static str {
        self.target.index_name()
    }

    /// The five pipelines of the catalog, in run order.
    pub fn standard() -> Vec<Self> {
        vec![
            Self::new("person_etl", EntityKind::Person, EntityKind::Person),
            Self::new("genre_etl", EntityKind::Genre, EntityKind::Genre),
            Self::new("filmwork_etl", EntityKind::Filmwork, EntityKind::Filmwork),
            Self::new("filmwork_by_person_etl", EntityKind::Person, EntityKind::Filmwork),
            Self::new("filmwork_by_genre_etl", EntityKind::Genre, EntityKind::Filmwork),
        ]
    }

    fn relation(&self) -> Result<Option<Relation>, PipelineError> {
        if !self.is_enriched() {
            return Ok(None);
        }
        match (self.target, Relation::for_entity(self.source)) {
            (EntityKind::Filmwork, Some(relation)) => Ok(Some(relation)),
            _ => Err(PipelineError::config(format!(
                "pipeline '{}' cannot enrich {} into {}",
                self.name, self.source, self.target
            ))),
        }
    }
}

/// Batch sizes of the reading stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub producer: usize,
    pub enricher: usize,
    pub merger: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            producer: DEFAULT_BATCH_SIZE,
            enricher: DEFAULT_BATCH_SIZE,
            merger: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Counters and watermarks of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub pipeline: String,
    /// Producer batches processed.
    pub batches: usize,
    /// Changed rows produced.
    pub rows: usize,
    /// Films found by enrichment.
    pub enriched: usize,
    /// Documents built.
    pub documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Malformed rows dropped by the transformer.
    pub skipped: usize,
    pub watermark_before: DateTime<Utc>,
    pub watermark_after: DateTime<Utc>,
}

impl RunReport {
    fn new(pipeline: &str, watermark: DateTime<Utc>) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            batches: 0,
            rows: 0,
            enriched: 0,
            documents: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            watermark_before: watermark,
            watermark_after: watermark,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} rows in {} batches, {} documents ({} ok, {} failed, {} skipped), watermark {} -> {}",
            self.pipeline,
            self.rows,
            self.batches,
            self.documents,
            self.succeeded,
            self.failed,
            self.skipped,
            format_timestamp(self.watermark_before),
            format_timestamp(self.watermark_after),
        )
    }
}

/// A configured pipeline. Each [`Pipeline::run`] loads its watermarks
/// afresh, so a failed run is simply retried by running again.
pub struct Pipeline {
    spec: PipelineSpec,
    relation: Option<Relation>,
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn CheckpointStore>,
    loader: Arc<IndexLoader>,
    definition: Option<Arc<IndexDefinition>>,
    sizes: BatchSizes,
    retry: RetryPolicy,
    transformer: DocumentTransformer,
}

impl Pipeline {
    pub fn new(
        spec: PipelineSpec,
        source: Arc<dyn CatalogSource>,
        store: Arc<dyn CheckpointStore>,
        loader: Arc<IndexLoader>,
    ) -> Result<Self, PipelineError> {
        let relation = spec.relation()?;
        Ok(Self {
            spec,
            relation,
            source,
            store,
            loader,
            definition: None,
            sizes: BatchSizes::default(),
            retry: RetryPolicy::default(),
            transformer: DocumentTransformer::new(),
        })
    }

    pub fn with_batch_sizes(mut self, sizes: BatchSizes) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create the target index from `definition` before every run.
    pub fn with_index_definition(
        mut self,
        definition: Arc<IndexDefinition>,
    ) -> Result<Self, PipelineError> {
        if definition.name != self.spec.index_name() {
            return Err(PipelineError::config(format!(
                "pipeline '{}' writes to '{}' but was given the definition of '{}'",
                self.spec.name,
                self.spec.index_name(),
                definition.name
            )));
        }
        self.definition = Some(definition);
        Ok(self)
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Run until the producer is exhausted.
    #[instrument(skip(self), fields(pipeline = %self.spec.name))]
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        if let Some(definition) = &self.definition {
            self.loader.ensure_index(definition).await?;
        }

        let checkpoint = Checkpoint::load(
            self.store.clone(),
            checkpoint_key(&self.spec.name, Stage::Producer),
            self.retry,
        )
        .await?;
        let mut producer = ChangeProducer::new(
            self.source.clone(),
            self.spec.source,
            checkpoint,
            self.sizes.producer,
            self.retry,
        );

        let mut enricher = match self.relation {
            Some(relation) => {
                let checkpoint = Checkpoint::load(
                    self.store.clone(),
                    checkpoint_key(&self.spec.name, Stage::Enricher),
                    self.retry,
                )
                .await?;
                Some(FilmEnricher::new(
                    self.source.clone(),
                    relation,
                    checkpoint,
                    self.sizes.enricher,
                    self.retry,
                ))
            }
            None => None,
        };

        let merger = JoinMerger::new(
            self.source.clone(),
            self.spec.target,
            self.sizes.merger,
            self.retry,
        );

        let mut report = RunReport::new(&self.spec.name, producer.watermark());
        info!(watermark = %format_timestamp(report.watermark_before), "Starting run");

        while let Some(batch) = producer.next_batch().await? {
            report.batches += 1;
            report.rows += batch.len();
            let ids: Vec<Uuid> = batch.iter().map(|row| row.id).collect();

            match enricher.as_mut() {
                None => self.process(&merger, &ids, &mut report).await?,
                Some(enricher) => {
                    enricher.begin(ids);
                    while let Some(films) = enricher.next_batch().await? {
                        report.enriched += films.len();
                        let film_ids: Vec<Uuid> = films.iter().map(|row| row.id).collect();
                        self.process(&merger, &film_ids, &mut report).await?;
                    }
                }
            }
        }

        report.watermark_after = producer.watermark();
        info!(
            rows = report.rows,
            documents = report.documents,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            watermark = %format_timestamp(report.watermark_after),
            "Run complete"
        );
        Ok(report)
    }

    async fn process(
        &self,
        merger: &JoinMerger,
        ids: &[Uuid],
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let merged = merger.merge(ids).await?;
        let output = self.transformer.transform(merged);
        report.skipped += output.skipped;
        report.documents += output.documents.len();

        if output.documents.is_empty() {
            debug!(ids = ids.len(), "Nothing to upload");
            return Ok(());
        }

        let loaded = self
            .loader
            .upload(self.spec.index_name(), &output.documents)
            .await?;
        report.succeeded += loaded.succeeded;
        report.failed += loaded.failed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_pipelines() {
        let specs = PipelineSpec::standard();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "person_etl",
                "genre_etl",
                "filmwork_etl",
                "filmwork_by_person_etl",
                "filmwork_by_genre_etl"
            ]
        );
        assert_eq!(specs[0].index_name(), "persons");
        assert!(!specs[2].is_enriched());
        assert!(specs[3].is_enriched());
        assert_eq!(specs[4].index_name(), "movies");
        for spec in &specs {
            assert!(spec.relation().is_ok());
        }
    }

    #[test]
    fn test_invalid_enrichment_is_rejected() {
        let spec = PipelineSpec::new("odd", EntityKind::Filmwork, EntityKind::Genre);
        assert!(matches!(spec.relation(), Err(PipelineError::ConfigError(_))));
    }
}
