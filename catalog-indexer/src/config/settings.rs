//! Process settings read from the environment.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::logging::LogFormat;
use crate::IndexingError;
use catalog_indexer_pipeline::pipeline::DEFAULT_BATCH_SIZE;
use catalog_indexer_pipeline::retry::{
    DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
use catalog_indexer_pipeline::scheduler::DEFAULT_SLEEP_INTERVAL;
use catalog_indexer_pipeline::loader::DEFAULT_LOADER_BATCH_SIZE;
use catalog_indexer_pipeline::{BatchSizes, PostgresConfig, RetryPolicy};
use catalog_indexer_repository::config::DEFAULT_SEARCH_URL;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_STATE_FILE: &str = "states/state.json";
const DEFAULT_SCHEMA_DIR: &str = "etl_schema";
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;

/// Where watermarks are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    Redis {
        url: String,
        namespace: Option<String>,
    },
    File(PathBuf),
    Memory,
}

/// Everything the indexer reads from its environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub postgres: PostgresConfig,
    pub search_url: String,
    pub search_timeout: Duration,
    pub state: StateBackend,
    /// Directory with the index mappings and settings.
    pub schema_dir: PathBuf,
    pub batch_sizes: BatchSizes,
    pub loader_batch_size: usize,
    pub sleep_interval: Duration,
    pub retry: RetryPolicy,
    pub run_once: bool,
    pub log_format: LogFormat,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, IndexingError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read settings through `lookup`; unset or empty variables take their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let text = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let defaults = PostgresConfig::default();
        let postgres = PostgresConfig {
            host: text("POSTGRES_HOST", &defaults.host),
            port: number(&var, "POSTGRES_PORT", defaults.port)?,
            dbname: text("POSTGRES_DB", &defaults.dbname),
            user: text("POSTGRES_USER", &defaults.user),
            password: text("POSTGRES_PASSWORD", &defaults.password),
            schema: text("POSTGRES_SCHEMA", &defaults.schema),
        };

        let state = match text("STATE_BACKEND", "redis").to_ascii_lowercase().as_str() {
            "redis" => StateBackend::Redis {
                url: text("REDIS_URL", DEFAULT_REDIS_URL),
                namespace: var("REDIS_NAMESPACE"),
            },
            "file" => StateBackend::File(PathBuf::from(text("STATE_FILE", DEFAULT_STATE_FILE))),
            "memory" => StateBackend::Memory,
            other => {
                return Err(IndexingError::config(format!(
                    "STATE_BACKEND must be one of redis, file, memory; got '{}'",
                    other
                )))
            }
        };

        let batch_sizes = BatchSizes {
            producer: batch_size(&var, "PRODUCER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            enricher: batch_size(&var, "ENRICHER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            merger: batch_size(&var, "MERGER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
        };

        let retry = RetryPolicy::new(
            number(&var, "RETRY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            Duration::from_millis(number(
                &var,
                "RETRY_INITIAL_DELAY_MS",
                DEFAULT_INITIAL_DELAY.as_millis() as u64,
            )?),
            Duration::from_millis(number(
                &var,
                "RETRY_MAX_DELAY_MS",
                DEFAULT_MAX_DELAY.as_millis() as u64,
            )?),
        );

        Ok(Self {
            postgres,
            search_url: text("ELASTIC_URL", DEFAULT_SEARCH_URL),
            search_timeout: Duration::from_secs(number(
                &var,
                "SEARCH_TIMEOUT_SECS",
                DEFAULT_SEARCH_TIMEOUT_SECS,
            )?),
            state,
            schema_dir: PathBuf::from(text("SCHEMA_DIR", DEFAULT_SCHEMA_DIR)),
            batch_sizes,
            loader_batch_size: batch_size(&var, "LOADER_BATCH_SIZE", DEFAULT_LOADER_BATCH_SIZE)?,
            sleep_interval: Duration::from_secs(number(
                &var,
                "SLEEP_INTERVAL_SECS",
                DEFAULT_SLEEP_INTERVAL.as_secs(),
            )?),
            retry,
            run_once: flag(&var, "RUN_ONCE")?,
            log_format: match var("LOG_FORMAT") {
                Some(raw) => raw.parse()?,
                None => LogFormat::default(),
            },
        })
    }
}

fn number<T, V>(var: &V, name: &str, default: T) -> Result<T, IndexingError>
where
    T: FromStr,
    T::Err: Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| IndexingError::config(format!("{} = '{}': {}", name, raw, e))),
        None => Ok(default),
    }
}

fn batch_size<V>(var: &V, name: &str, default: usize) -> Result<usize, IndexingError>
where
    V: Fn(&str) -> Option<String>,
{
    let size = number(var, name, default)?;
    if size == 0 {
        return Err(IndexingError::config(format!("{} must be at least 1", name)));
    }
    Ok(size)
}

fn flag<V>(var: &V, name: &str) -> Result<bool, IndexingError>
where
    V: Fn(&str) -> Option<String>,
{
    match var(name).map(|raw| raw.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(IndexingError::config(format!(
                "{} must be a boolean, got '{}'",
                name, raw
            ))),
        },
    }
}
