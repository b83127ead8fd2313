//! Configuration for the flurry loader.

mod cli;
mod shard_key;

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
pub use cli::CliArgs;
pub use flurry_core::config::{MetricsConfig, load_yaml_file, parse_yaml};
pub use shard_key::ShardKey;

/// Configuration for source discovery and reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// `dir/pattern` of source files; `*` and `?` are allowed in the file name.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Compression format of input files.
    #[serde(default)]
    pub compression: CompressionFormat,
    /// Number of lines per chunk handed from the reader to the dispatcher.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of files dispatched concurrently.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            compression: CompressionFormat::default(),
            batch_size: default_batch_size(),
            max_concurrent_files: default_max_concurrent_files(),
        }
    }
}

fn default_pattern() -> String {
    "/data/appsinstalled/*.tsv.gz".to_string()
}

fn default_batch_size() -> usize {
    1024
}

fn default_max_concurrent_files() -> usize {
    2
}

/// Compression format of input files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    Gzip,
    Zstd,
    None,
    /// Pick by file extension: `.gz`, `.zst`/`.zstd`, anything else is plain.
    Auto,
}

impl CompressionFormat {
    /// Resolve `Auto` against a concrete path.
    pub fn for_path(self, path: &Path) -> CompressionFormat {
        match self {
            CompressionFormat::Auto => match path.extension().and_then(|e| e.to_str()) {
                Some("gz") => CompressionFormat::Gzip,
                Some("zst" | "zstd") => CompressionFormat::Zstd,
                _ => CompressionFormat::None,
            },
            other => other,
        }
    }
}

/// Settings for routing, workers and the completion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Skip store writes and count every encoded record as processed.
    #[serde(default)]
    pub dry_run: bool,
    /// Highest error rate at which a file is still accepted.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Records dispatched but not yet written, across all shards.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Capacity of each shard queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Reject a whole line when any app id fails to parse.
    #[serde(default)]
    pub strict_app_ids: bool,
    /// Log progress every this many lines per file.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            error_rate_threshold: default_error_rate_threshold(),
            max_in_flight: default_max_in_flight(),
            queue_capacity: default_queue_capacity(),
            strict_app_ids: false,
            progress_interval: default_progress_interval(),
        }
    }
}

fn default_error_rate_threshold() -> f64 {
    0.01
}

fn default_max_in_flight() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    100
}

fn default_progress_interval() -> u64 {
    100_000
}

/// Settings for the key-value store clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Connect and per-write timeout in milliseconds.
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
    /// Extra attempts for transient store failures. Zero disables retry.
    #[serde(default)]
    pub max_retries: u32,
    /// Initial retry delay in milliseconds, doubled per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            socket_timeout_ms: default_socket_timeout_ms(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_socket_timeout_ms() -> u64 {
    2000
}

fn default_retry_backoff_ms() -> u64 {
    100
}

/// Default destination shards and their memcached endpoints.
pub fn default_shards() -> IndexMap<ShardKey, String> {
    [
        ("idfa", "127.0.0.1:33013"),
        ("gaid", "127.0.0.1:33014"),
        ("adid", "127.0.0.1:33015"),
        ("dvid", "127.0.0.1:33016"),
    ]
    .into_iter()
    .map(|(key, addr)| (ShardKey::new(key), addr.to_string()))
    .collect()
}

/// Main configuration for flurry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Source configuration.
    #[serde(default)]
    pub source: SourceConfig,
    /// Destination key to endpoint address, in routing order.
    #[serde(default = "default_shards")]
    pub shards: IndexMap<ShardKey, String>,
    /// Pipeline configuration.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Store client configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            shards: default_shards(),
            pipeline: PipelineConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: LoaderConfig = load_yaml_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: LoaderConfig = parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.pattern.trim().is_empty() {
            return Err(ConfigError::EmptySourcePattern);
        }
        if self.shards.is_empty() {
            return Err(ConfigError::NoShards);
        }
        for (key, address) in &self.shards {
            if key.id().is_empty() {
                return Err(ConfigError::EmptyShardKey);
            }
            if address.trim().is_empty() {
                return Err(ConfigError::EmptyShardAddress {
                    shard: key.to_string(),
                });
            }
        }

        let threshold = self.pipeline.error_rate_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold { value: threshold });
        }

        let positive = [
            ("pipeline.max_in_flight", self.pipeline.max_in_flight),
            ("pipeline.queue_capacity", self.pipeline.queue_capacity),
            ("source.batch_size", self.source.batch_size),
            ("source.max_concurrent_files", self.source.max_concurrent_files),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroValue { field });
        }

        Ok(())
    }
}
