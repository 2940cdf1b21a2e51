//! Dependency initialization and wiring for the catalog indexer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::settings::{Settings, StateBackend};
use crate::IndexingError;
use catalog_indexer_pipeline::{
    CatalogSource, CheckpointError, CheckpointStore, IndexLoader, JsonFileStore, MemoryStore,
    PgCatalogSource, Pipeline, PipelineSpec, RedisStore, RetryPolicy, Scheduler, SchedulerConfig,
    SourceError,
};
use catalog_indexer_repository::{IndexDefinition, OpenSearchClient, SearchIndexConfig};
use catalog_indexer_shared::EntityKind;

/// Indices the pipelines write to.
const INDEXED_KINDS: [EntityKind; 3] = [EntityKind::Filmwork, EntityKind::Genre, EntityKind::Person];

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured scheduler ready to run.
    pub scheduler: Scheduler,
}

impl Dependencies {
    /// Connect to the catalog, the checkpoint store and the search engine,
    /// load the index definitions and build the pipelines.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If a backend is unreachable or the configuration is invalid
    pub async fn new(settings: &Settings) -> Result<Self, IndexingError> {
        info!(
            postgres = ?settings.postgres,
            search_url = %settings.search_url,
            state = ?settings.state,
            schema_dir = %settings.schema_dir.display(),
            "Initializing dependencies"
        );

        let source = connect_source(settings).await?;
        info!("Catalog connection verified");

        let store = open_store(&settings.state, settings.retry).await?;
        info!("Checkpoint store ready");

        let search_config = SearchIndexConfig::new(&settings.search_url)
            .with_request_timeout(settings.search_timeout)
            .with_max_batch_size(settings.loader_batch_size);
        let search_client = OpenSearchClient::new(&search_config)?;
        let loader = Arc::new(IndexLoader::with_config(
            Arc::new(search_client),
            settings.loader_batch_size,
            settings.retry,
        ));
        if !loader.health_check().await? {
            return Err(IndexingError::config("Search cluster is unhealthy"));
        }
        info!("Search cluster connection verified");

        let definitions = load_definitions(&settings.schema_dir).await?;

        let mut pipelines = Vec::new();
        for spec in PipelineSpec::standard() {
            let definition = definitions.get(spec.index_name()).cloned().ok_or_else(|| {
                IndexingError::config(format!("no index definition for '{}'", spec.index_name()))
            })?;
            let pipeline = Pipeline::new(spec, source.clone(), store.clone(), loader.clone())?
                .with_batch_sizes(settings.batch_sizes)
                .with_retry(settings.retry)
                .with_index_definition(definition)?;
            pipelines.push(pipeline);
        }
        info!(count = pipelines.len(), "Pipelines configured");

        let scheduler = Scheduler::new(
            pipelines,
            SchedulerConfig {
                sleep_interval: settings.sleep_interval,
            },
        );

        Ok(Self { scheduler })
    }
}

async fn connect_source(settings: &Settings) -> Result<Arc<dyn CatalogSource>, IndexingError> {
    let config = &settings.postgres;
    let source = settings
        .retry
        .run(
            "catalog connect",
            move || PgCatalogSource::connect(config.clone()),
            SourceError::is_transient,
        )
        .await?;

    let source: Arc<dyn CatalogSource> = Arc::new(source);
    let catalog = &source;
    settings
        .retry
        .run("catalog health check", move || catalog.health_check(), SourceError::is_transient)
        .await?;
    Ok(source)
}

async fn open_store(
    backend: &StateBackend,
    retry: RetryPolicy,
) -> Result<Arc<dyn CheckpointStore>, IndexingError> {
    let store: Arc<dyn CheckpointStore> = match backend {
        StateBackend::Redis { url, namespace } => {
            let store = retry
                .run(
                    "redis connect",
                    move || RedisStore::connect(url, namespace.clone()),
                    CheckpointError::is_transient,
                )
                .await?;
            Arc::new(store)
        }
        StateBackend::File(path) => Arc::new(JsonFileStore::open(path.clone()).await?),
        StateBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

/// Load the definition of every index from `schema_dir`.
pub(crate) async fn load_definitions(
    schema_dir: &Path,
) -> Result<HashMap<&'static str, Arc<IndexDefinition>>, IndexingError> {
    let mut definitions = HashMap::new();
    for kind in INDEXED_KINDS {
        let name = kind.index_name();
        let definition = IndexDefinition::load(schema_dir, name).await?;
        definitions.insert(name, Arc::new(definition));
    }
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_definitions() {
        let dir = tempfile::tempdir().unwrap();
        for kind in INDEXED_KINDS {
            let name = kind.index_name();
            std::fs::write(
                IndexDefinition::mappings_path(dir.path(), name),
                json!({"dynamic": "strict", "properties": {"id": {"type": "keyword"}}}).to_string(),
            )
            .unwrap();
            std::fs::write(
                IndexDefinition::settings_path(dir.path(), name),
                json!({"refresh_interval": "1s"}).to_string(),
            )
            .unwrap();
        }

        let definitions = load_definitions(dir.path()).await.unwrap();

        assert_eq!(definitions.len(), 3);
        assert_eq!(definitions["movies"].name, "movies");
        assert_eq!(definitions["persons"].settings, json!({"refresh_interval": "1s"}));
    }

    #[tokio::test]
    async fn test_missing_definition_fails() {
        let dir = tempfile::tempdir().unwrap();

        let err = load_definitions(dir.path()).await.unwrap_err();

        assert!(matches!(err, IndexingError::SearchError(_)));
    }

    #[tokio::test]
    async fn test_shipped_definitions_load() {
        let schema_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../etl_schema");

        let definitions = load_definitions(&schema_dir).await.unwrap();

        for kind in INDEXED_KINDS {
            let definition = &definitions[kind.index_name()];
            assert!(definition.mappings["properties"]["id"].is_object());
            assert!(definition.settings["analysis"].is_object());
        }
    }

    #[tokio::test]
    async fn test_memory_store_backend() {
        let store = open_store(&StateBackend::Memory, RetryPolicy::no_retry()).await.unwrap();
        assert_eq!(store.get("person_etl_producer_last_modified").await.unwrap(), None);
    }
}
