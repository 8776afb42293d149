//! Queue configuration.
//!
//! Configuration is an explicit struct passed into the queue rather than
//! ambient process-wide state. It can be loaded from a JSON file where any
//! missing key falls back to its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read or write the config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Settings consumed by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default attempt ceiling for newly enqueued jobs.
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds. Unsigned so a config
    /// file cannot smuggle in negative delays.
    pub backoff_base: u32,
    /// Per-command execution timeout. `None` lets commands run indefinitely.
    pub execution_timeout_secs: Option<u64>,
    /// Location of the SQLite job database.
    pub db_path: PathBuf,
    /// Location of the worker pool record.
    pub pool_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            execution_timeout_secs: None,
            db_path: PathBuf::from("jobs.db"),
            pool_file: PathBuf::from("workers.json"),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields the defaults; a malformed file is an explicit
    /// error rather than a silent fallback.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(error.into()),
        }
    }

    /// Writes the configuration to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        tokio::fs::write(path, serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn a_missing_file_yields_the_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load(dir.path().join("config.json")).await.unwrap();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, 2);
        assert_eq!(config.execution_timeout_secs, None);
    }

    #[tokio::test]
    async fn partial_files_fall_back_field_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, br#"{"max_retries": 7}"#)
            .await
            .unwrap();

        let config = Config::load(&path).await.unwrap();

        assert_eq!(config.max_retries, 7);
        assert_eq!(config.backoff_base, 2);
    }

    #[tokio::test]
    async fn a_negative_backoff_base_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, br#"{"backoff_base": -2}"#)
            .await
            .unwrap();

        assert_matches!(Config::load(&path).await, Err(ConfigError::Malformed(_)));
    }

    #[tokio::test]
    async fn a_malformed_file_is_an_explicit_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        assert_matches!(Config::load(&path).await, Err(ConfigError::Malformed(_)));
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            max_retries: 5,
            backoff_base: 3,
            execution_timeout_secs: Some(30),
            db_path: PathBuf::from("queue.db"),
            pool_file: PathBuf::from("pool.json"),
        };

        config.save(&path).await.unwrap();
        let loaded = Config::load(&path).await.unwrap();

        assert_eq!(loaded.max_retries, 5);
        assert_eq!(loaded.backoff_base, 3);
        assert_eq!(loaded.execution_timeout_secs, Some(30));
        assert_eq!(loaded.db_path, PathBuf::from("queue.db"));
    }
}
