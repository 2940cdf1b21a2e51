//! Index definitions: the mappings and settings an index is created with.
//!
//! Definitions are static configuration. They live next to the binary as a
//! pair of JSON files per index, `<index>_index_mappings.json` and
//! `<index>_index_settings.json`, and are loaded once at startup.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::SearchIndexError;

/// Mappings and settings for one index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    /// The index name.
    pub name: String,
    /// The `mappings` object sent on creation.
    pub mappings: Value,
    /// The `settings` object sent on creation (analyzers, shards, replicas).
    pub settings: Value,
}

impl IndexDefinition {
    /// Build a definition from in-memory documents.
    ///
    /// Both documents must be JSON objects.
    pub fn new(
        name: impl Into<String>,
        mappings: Value,
        settings: Value,
    ) -> Result<Self, SearchIndexError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SearchIndexError::definition("index name is empty"));
        }
        if !mappings.is_object() {
            return Err(SearchIndexError::definition(format!(
                "mappings for '{}' must be a JSON object",
                name
            )));
        }
        if !settings.is_object() {
            return Err(SearchIndexError::definition(format!(
                "settings for '{}' must be a JSON object",
                name
            )));
        }
        Ok(Self {
            name,
            mappings,
            settings,
        })
    }

    /// Path of the mappings file for `name` inside `schema_dir`.
    pub fn mappings_path(schema_dir: &Path, name: &str) -> PathBuf {
        schema_dir.join(format!("{}_index_mappings.json", name))
    }

    /// Path of the settings file for `name` inside `schema_dir`.
    pub fn settings_path(schema_dir: &Path, name: &str) -> PathBuf {
        schema_dir.join(format!("{}_index_settings.json", name))
    }

    /// Load the definition of index `name` from `schema_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchIndexError::DefinitionError`] if either file is missing
    /// or is not a JSON object.
    pub async fn load(schema_dir: &Path, name: &str) -> Result<Self, SearchIndexError> {
        let mappings = read_json(&Self::mappings_path(schema_dir, name)).await?;
        let settings = read_json(&Self::settings_path(schema_dir, name)).await?;

        debug!(index = %name, dir = %schema_dir.display(), "Loaded index definition");
        Self::new(name, mappings, settings)
    }

    /// The request body for index creation.
    pub fn body(&self) -> Value {
        json!({
            "settings": self.settings,
            "mappings": self.mappings,
        })
    }
}

async fn read_json(path: &Path) -> Result<Value, SearchIndexError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        SearchIndexError::definition(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        SearchIndexError::definition(format!("invalid JSON in {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[tokio::test]
    async fn test_load_definition() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "genres_index_mappings.json",
            r#"{"dynamic": "strict", "properties": {"id": {"type": "keyword"}}}"#,
        );
        write(
            dir.path(),
            "genres_index_settings.json",
            r#"{"refresh_interval": "1s"}"#,
        );

        let definition = IndexDefinition::load(dir.path(), "genres").await.unwrap();

        assert_eq!(definition.name, "genres");
        assert_eq!(definition.mappings["properties"]["id"]["type"], "keyword");

        let body = definition.body();
        assert_eq!(body["settings"]["refresh_interval"], "1s");
        assert_eq!(body["mappings"]["dynamic"], "strict");
    }

    #[tokio::test]
    async fn test_missing_file_is_definition_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "movies_index_mappings.json", "{}");

        let err = IndexDefinition::load(dir.path(), "movies").await.unwrap_err();

        assert!(matches!(err, SearchIndexError::DefinitionError(ref msg) if msg.contains("movies_index_settings.json")));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_json_is_definition_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "persons_index_mappings.json", "{ not json");
        write(dir.path(), "persons_index_settings.json", "{}");

        let err = IndexDefinition::load(dir.path(), "persons").await.unwrap_err();
        assert!(matches!(err, SearchIndexError::DefinitionError(_)));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = IndexDefinition::new("movies", json!([]), json!({})).unwrap_err();
        assert!(matches!(err, SearchIndexError::DefinitionError(_)));

        assert!(IndexDefinition::new("", json!({}), json!({})).is_err());
    }
}
