//! Watermark persistence.
//!
//! A watermark is one timestamp per (pipeline, stage) pair, stored as an
//! ISO-8601 string under `<pipeline>_<stage>_last_modified`. Stages talk to
//! their watermark through a [`Checkpoint`]; the [`CheckpointStore`] behind
//! it is a JSON file, Redis, or memory.

mod json_file;
mod memory;
mod redis_store;

pub use self::json_file::JsonFileStore;
pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::retry::RetryPolicy;
use catalog_indexer_shared::epoch_min;

/// Errors raised by checkpoint stores.
#[derive(Error, Debug, Clone)]
pub enum CheckpointError {
    /// The backing service could not be reached.
    #[error("Checkpoint store connection error: {0}")]
    ConnectionError(String),

    /// Reading or writing the state file failed.
    #[error("Checkpoint store I/O error: {0}")]
    IoError(String),

    /// The backing service rejected the command.
    #[error("Checkpoint store error: {0}")]
    BackendError(String),

    /// A stored value is not a timestamp, or the state file is not a JSON object.
    #[error("Corrupt checkpoint '{key}': {value}")]
    Corrupt { key: String, value: String },
}

impl CheckpointError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::IoError(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendError(msg.into())
    }

    pub fn corrupt(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CheckpointError::ConnectionError(_) | CheckpointError::IoError(_)
        )
    }
}

/// Key/value persistence for watermarks.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the watermark stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, CheckpointError>;

    /// Durably store `value` under `key`.
    async fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), CheckpointError>;
}

/// The pipeline stages that own a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Producer,
    Enricher,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Producer => "producer",
            Stage::Enricher => "enricher",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The store key of `stage`'s watermark in `pipeline`.
pub fn checkpoint_key(pipeline: &str, stage: Stage) -> String {
    format!("{}_{}_last_modified", pipeline, stage)
}

/// Render a watermark the way it is stored.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Parse a stored watermark.
///
/// Accepts RFC 3339 and, for state written by older tools, a naive
/// `YYYY-MM-DDTHH:MM:SS[.ffffff]` string, which is read as UTC.
pub fn parse_timestamp(key: &str, raw: &str) -> Result<DateTime<Utc>, CheckpointError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| CheckpointError::corrupt(key, raw))
}

/// One stage's watermark: a store, a key and the last value seen.
///
/// The watermark is created at the epoch minimum the first time it is
/// loaded. Writes go through the retry policy; if they still fail the caller
/// gets the error and the in-memory value is left unchanged.
pub struct Checkpoint {
    store: Arc<dyn CheckpointStore>,
    key: String,
    retry: RetryPolicy,
    current: DateTime<Utc>,
}

impl Checkpoint {
    /// Load the watermark stored under `key`, creating it if absent.
    pub async fn load(
        store: Arc<dyn CheckpointStore>,
        key: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, CheckpointError> {
        let key = key.into();
        let stored = {
            let store = &store;
            let key = key.as_str();
            retry
                .run("checkpoint read", move || store.get(key), CheckpointError::is_transient)
                .await?
        };

        let mut checkpoint = Self {
            store,
            key,
            retry,
            current: epoch_min(),
        };

        match stored {
            Some(value) => {
                checkpoint.current = value;
                debug!(key = %checkpoint.key, watermark = %format_timestamp(value), "Loaded watermark");
            }
            None => {
                checkpoint.persist(epoch_min()).await?;
                info!(key = %checkpoint.key, "Initialized watermark");
            }
        }

        Ok(checkpoint)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The last persisted value.
    pub fn current(&self) -> DateTime<Utc> {
        self.current
    }

    /// Move the watermark forward to `value`.
    ///
    /// Values not newer than the current watermark are ignored. Returns
    /// whether a write happened.
    pub async fn advance(&mut self, value: DateTime<Utc>) -> Result<bool, CheckpointError> {
        if value <= self.current {
            return Ok(false);
        }
        self.persist(value).await?;
        debug!(
            key = %self.key,
            from = %format_timestamp(self.current),
            to = %format_timestamp(value),
            "Watermark advanced"
        );
        self.current = value;
        Ok(true)
    }

    /// Put the watermark back to the epoch minimum.
    pub async fn reset(&mut self) -> Result<(), CheckpointError> {
        if self.current == epoch_min() {
            return Ok(());
        }
        self.persist(epoch_min()).await?;
        debug!(key = %self.key, "Watermark reset");
        self.current = epoch_min();
        Ok(())
    }

    async fn persist(&self, value: DateTime<Utc>) -> Result<(), CheckpointError> {
        let store = &self.store;
        let key = self.key.as_str();
        self.retry
            .run(
                "checkpoint write",
                move || store.set(key, value),
                CheckpointError::is_transient,
            )
            .await
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("key", &self.key)
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store whose writes fail a fixed number of times before succeeding.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicUsize,
        writes: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures_left: AtomicUsize::new(failures),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), CheckpointError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CheckpointError::connection("connection reset"));
            }
            self.inner.set(key, value).await
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(
            checkpoint_key("filmwork_by_person_etl", Stage::Enricher),
            "filmwork_by_person_etl_enricher_last_modified"
        );
        assert_eq!(checkpoint_key("genre_etl", Stage::Producer), "genre_etl_producer_last_modified");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2021, 6, 16, 20, 14, 9).unwrap();

        assert_eq!(parse_timestamp("k", "2021-06-16T20:14:09+00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("k", "2021-06-16T20:14:09Z").unwrap(), expected);
        assert_eq!(parse_timestamp("k", "2021-06-16T20:14:09").unwrap(), expected);
        assert_eq!(parse_timestamp("k", "0001-01-01T00:00:00").unwrap(), epoch_min());
        assert_eq!(
            parse_timestamp("k", &format_timestamp(ts(5))).unwrap(),
            ts(5)
        );

        let err = parse_timestamp("k", "last tuesday").unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_load_initializes_missing_watermark() {
        let store = Arc::new(MemoryStore::new());

        let checkpoint = Checkpoint::load(store.clone(), "genre_etl_producer_last_modified", fast_retry(1))
            .await
            .unwrap();

        assert_eq!(checkpoint.current(), epoch_min());
        assert_eq!(
            store.get("genre_etl_producer_last_modified").await.unwrap(),
            Some(epoch_min())
        );
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let mut checkpoint = Checkpoint::load(store.clone(), "k", fast_retry(1)).await.unwrap();

        assert!(checkpoint.advance(ts(10)).await.unwrap());
        assert!(!checkpoint.advance(ts(5)).await.unwrap());
        assert!(!checkpoint.advance(ts(10)).await.unwrap());

        assert_eq!(checkpoint.current(), ts(10));
        assert_eq!(store.get("k").await.unwrap(), Some(ts(10)));
    }

    #[tokio::test]
    async fn test_reset_returns_to_epoch_min() {
        let store = Arc::new(MemoryStore::new());
        let mut checkpoint = Checkpoint::load(store.clone(), "k", fast_retry(1)).await.unwrap();
        checkpoint.advance(ts(10)).await.unwrap();

        checkpoint.reset().await.unwrap();

        assert_eq!(checkpoint.current(), epoch_min());
        assert_eq!(store.get("k").await.unwrap(), Some(epoch_min()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_write_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2));
        store.inner.set("k", ts(0)).await.unwrap();
        let mut checkpoint = Checkpoint::load(store.clone(), "k", fast_retry(3)).await.unwrap();

        assert!(checkpoint.advance(ts(1)).await.unwrap());
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.get("k").await.unwrap(), Some(ts(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_write_keeps_old_value() {
        let store = Arc::new(FlakyStore::new(10));
        store.inner.set("k", ts(0)).await.unwrap();
        let mut checkpoint = Checkpoint::load(store.clone(), "k", fast_retry(2)).await.unwrap();

        let err = checkpoint.advance(ts(1)).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(checkpoint.current(), ts(0));
        assert_eq!(store.inner.get("k").await.unwrap(), Some(ts(0)));
    }
}
