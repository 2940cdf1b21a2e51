//! Checkpoint store backed by Redis.

use async_trait::async_trait;
use bb8_redis::{bb8, redis, RedisConnectionManager};
use chrono::{DateTime, Utc};
use tracing::info;

use super::{format_timestamp, parse_timestamp, CheckpointError, CheckpointStore};

/// Connections kept open to Redis. Stages run one at a time, so a handful is
/// plenty.
const POOL_SIZE: u32 = 4;

/// One Redis string per watermark, optionally under a `<namespace>:` prefix.
pub struct RedisStore {
    pool: bb8::Pool<RedisConnectionManager>,
    namespace: Option<String>,
}

impl RedisStore {
    /// Build a connection pool for `url`.
    pub async fn connect(url: &str, namespace: Option<String>) -> Result<Self, CheckpointError> {
        let manager = RedisConnectionManager::new(url)
            .map_err(|e| CheckpointError::connection(format!("invalid redis URL '{}': {}", url, e)))?;
        let pool = bb8::Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .await
            .map_err(|e| CheckpointError::connection(e.to_string()))?;

        info!(url = %url, namespace = ?namespace, "Connected to Redis checkpoint store");
        Ok(Self { pool, namespace })
    }

    async fn connection(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, CheckpointError> {
        self.pool
            .get()
            .await
            .map_err(|e| CheckpointError::connection(e.to_string()))
    }
}

fn namespaced_key(namespace: Option<&str>, key: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}:{}", ns, key),
        _ => key.to_string(),
    }
}

fn command_error(e: redis::RedisError) -> CheckpointError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        CheckpointError::connection(e.to_string())
    } else {
        CheckpointError::backend(e.to_string())
    }
}

#[async_trait]
impl CheckpointStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(namespaced_key(self.namespace.as_deref(), key))
            .query_async(&mut *conn)
            .await
            .map_err(command_error)?;

        raw.map(|value| parse_timestamp(key, &value)).transpose()
    }

    async fn set(&self, key: &str, value: DateTime<Utc>) -> Result<(), CheckpointError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(namespaced_key(self.namespace.as_deref(), key))
            .arg(format_timestamp(value))
            .query_async(&mut *conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }
}
