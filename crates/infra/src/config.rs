//! Worker configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::feeds::FACTORS_FILE;
use crate::store_adapter::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Postgres URL. `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub streams_dir: PathBuf,
    pub static_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub commit_interval: Duration,
    pub feed_poll_interval: Duration,
    /// Rows buffered between the feed tailer and the pipeline before the
    /// tailer blocks.
    pub feed_queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            streams_dir: PathBuf::from("/data/streams"),
            static_dir: PathBuf::from("/data/static"),
            outputs_dir: PathBuf::from("/data/outputs"),
            commit_interval: Duration::from_millis(1000),
            feed_poll_interval: Duration::from_millis(500),
            feed_queue_capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            database_url: get("DATABASE_URL"),
            streams_dir: get("STREAMS_DIR").map(PathBuf::from).unwrap_or(defaults.streams_dir),
            static_dir: get("STATIC_DIR").map(PathBuf::from).unwrap_or(defaults.static_dir),
            outputs_dir: get("OUTPUTS_DIR").map(PathBuf::from).unwrap_or(defaults.outputs_dir),
            commit_interval: millis("COMMIT_INTERVAL_MS", get("COMMIT_INTERVAL_MS"), defaults.commit_interval)?,
            feed_poll_interval: millis(
                "FEED_POLL_INTERVAL_MS",
                get("FEED_POLL_INTERVAL_MS"),
                defaults.feed_poll_interval,
            )?,
            feed_queue_capacity: positive(
                "FEED_QUEUE_CAPACITY",
                get("FEED_QUEUE_CAPACITY"),
                defaults.feed_queue_capacity as u32,
            )? as usize,
            retry: RetryPolicy {
                max_attempts: positive("PERSIST_MAX_ATTEMPTS", get("PERSIST_MAX_ATTEMPTS"), defaults.retry.max_attempts)?,
                base_backoff: Duration::from_millis(number(
                    "PERSIST_BACKOFF_MS",
                    get("PERSIST_BACKOFF_MS"),
                    defaults.retry.base_backoff.as_millis() as u64,
                )?),
            },
        })
    }

    pub fn factors_path(&self) -> PathBuf {
        self.static_dir.join(FACTORS_FILE)
    }
}

fn number(key: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
            key,
            value: v,
            reason: e.to_string(),
        }),
    }
}

fn positive(key: &'static str, raw: Option<String>, default: u32) -> Result<u32, ConfigError> {
    let n = number(key, raw, u64::from(default))?;
    u32::try_from(n)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: n.to_string(),
            reason: "must be a positive 32-bit integer".to_string(),
        })
}

fn millis(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let ms = number(key, raw, default.as_millis() as u64)?;
    if ms == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: ms.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, WorkerConfig::default());
        assert_eq!(cfg.factors_path(), PathBuf::from("/data/static/emission_factors.jsonl"));
    }

    #[test]
    fn values_override_defaults() {
        let cfg = WorkerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://carbon@localhost/carbon"),
            ("STREAMS_DIR", "/tmp/streams"),
            ("COMMIT_INTERVAL_MS", "250"),
            ("PERSIST_MAX_ATTEMPTS", "5"),
            ("PERSIST_BACKOFF_MS", "0"),
            ("FEED_QUEUE_CAPACITY", "64"),
            ("OUTPUTS_DIR", "  "),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://carbon@localhost/carbon"));
        assert_eq!(cfg.streams_dir, PathBuf::from("/tmp/streams"));
        assert_eq!(cfg.outputs_dir, PathBuf::from("/data/outputs"));
        assert_eq!(cfg.commit_interval, Duration::from_millis(250));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_backoff, Duration::ZERO);
        assert_eq!(cfg.feed_queue_capacity, 64);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("COMMIT_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "COMMIT_INTERVAL_MS", .. }));

        assert!(WorkerConfig::from_lookup(lookup(&[("FEED_POLL_INTERVAL_MS", "0")])).is_err());
        assert!(WorkerConfig::from_lookup(lookup(&[("PERSIST_MAX_ATTEMPTS", "0")])).is_err());
        assert!(WorkerConfig::from_lookup(lookup(&[("FEED_QUEUE_CAPACITY", "0")])).is_err());
    }
}
