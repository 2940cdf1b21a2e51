//! Checkpoint store backed by a local JSON file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{format_timestamp, parse_timestamp, CheckpointError, CheckpointStore};

/// All watermarks in one JSON object, `{key: iso8601}`.
///
/// The file is rewritten in full on every `set`, pretty-printed with sorted
/// keys, through a temporary file that is then renamed over the original.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the state file at `path`. A missing or empty file is an empty state.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                CheckpointError::corrupt(path.display().to_string(), e.to_string())
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(CheckpointError::io(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!(path = %path.display(), keys = values.len(), "Opened state file");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_file(&self, values: &BTreeMap<String, String>) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CheckpointError::io(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let body = serde_json::to_string_pretty(values)
            .map_err(|e| CheckpointError::io(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| CheckpointError::io(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CheckpointError::io(format!("cannot replace {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let values = self.values.lock().await;
        values
            .get(key)
            .map(|raw| parse_timestamp(key, raw))
            .transpose()
    }

    async fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), CheckpointError> {
        let mut values = self.values.lock().await;
        let mut updated = values.clone();
        updated.insert(key.to_string(), format_timestamp(value));

        self.write_file(&updated).await?;
        *values = updated;

        debug!(key, path = %self.path.display(), "State file updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_indexer_shared::epoch_min;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).await.unwrap();

        assert_eq!(store.get("person_etl_producer_last_modified").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("states").join("state.json");
        let modified = Utc.with_ymd_and_hms(2023, 3, 1, 12, 30, 0).unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        store.set("person_etl_producer_last_modified", modified).await.unwrap();
        store.set("genre_etl_producer_last_modified", epoch_min()).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("person_etl_producer_last_modified").await.unwrap(),
            Some(modified)
        );
        assert_eq!(
            reopened.get("genre_etl_producer_last_modified").await.unwrap(),
            Some(epoch_min())
        );
    }

    #[tokio::test]
    async fn test_file_is_sorted_iso_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::open(&path).await.unwrap();

        store
            .set("b_key", Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        store.set("a_key", epoch_min()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed["b_key"], "2023-03-01T00:00:00+00:00");
        assert_eq!(parsed["a_key"], "0001-01-01T00:00:00+00:00");
        assert!(raw.find("a_key").unwrap() < raw.find("b_key").unwrap());
        assert!(raw.contains('\n'));
    }

    #[tokio::test]
    async fn test_reads_naive_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"filmwork_etl_producer_last_modified": "2021-06-16T20:14:09.221838"}"#)
            .unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        let value = store
            .get("filmwork_etl_producer_last_modified")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(value.timestamp_subsec_micros(), 221838);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let err = JsonFileStore::open(&path).await.err().unwrap();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
        assert!(!err.is_transient());
    }
}
