//! flurry: loads compressed device install logs into sharded memcached endpoints.
//!
//! This crate handles:
//! - Discovering and streaming gzip/zstd compressed TSV source files
//! - Decoding each line into a device record
//! - Routing records to one bounded queue per destination shard
//! - Writing protobuf-encoded values through a key-value store per shard
//! - Per-file error accounting and marking accepted files as done

pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod store;

// Re-export commonly used items
pub use config::{CliArgs, LoaderConfig};
pub use error::PipelineError;
pub use pipeline::{RunReport, run_pipeline};

pub use flurry_core::{MetricsConfig, init_metrics, init_tracing, shutdown_signal};
