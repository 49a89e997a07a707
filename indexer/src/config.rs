//! YAML configuration of the indexer.

use lcc::index::{BuilderConfig, IndexerConfig};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

const DEFAULT_LOOKBACK: u64 = 24 * 60 * 60;
const DEFAULT_INTERVAL: u64 = 5 * 60;

/// Errors that can occur when loading a [Config].
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("no record types configured")]
    NoRecordTypes,
}

fn default_lookback() -> u64 {
    DEFAULT_LOOKBACK
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL
}

/// Indexer configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Root of bucket and snapshot storage.
    pub storage_dir: PathBuf,

    /// Record types to index.
    pub record_types: Vec<String>,

    /// Width of bucket windows (in seconds).
    pub bucket_width: u64,

    /// How far back each rebuild reads (in seconds).
    #[serde(default = "default_lookback")]
    pub lookback: u64,

    /// Time between rebuilds (in seconds).
    #[serde(default = "default_interval")]
    pub interval: u64,
}

impl Config {
    /// Load a [Config] from a YAML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let config: Self = serde_yaml::from_reader(file)?;
        if config.record_types.is_empty() {
            return Err(Error::NoRecordTypes);
        }
        Ok(config)
    }

    /// The configuration of the [lcc::index::Indexer] for `record_type`.
    pub fn indexer(&self, record_type: &str) -> IndexerConfig {
        IndexerConfig {
            builder: BuilderConfig {
                record_type: record_type.to_string(),
                bucket_width: Duration::from_secs(self.bucket_width),
                lookback: Duration::from_secs(self.lookback),
            },
            interval: Duration::from_secs(self.interval),
        }
    }
}
