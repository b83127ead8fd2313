//! Common error types for configuration and metrics.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source pattern is empty.
    #[snafu(display("Source pattern cannot be empty"))]
    EmptySourcePattern,

    /// No destination shards configured.
    #[snafu(display("At least one shard must be configured"))]
    NoShards,

    /// A shard entry has an empty destination key.
    #[snafu(display("Shard destination key cannot be empty"))]
    EmptyShardKey,

    /// A shard entry has no endpoint address.
    #[snafu(display("Shard '{shard}' has an empty address"))]
    EmptyShardAddress { shard: String },

    /// Error rate threshold outside of [0, 1].
    #[snafu(display("Error rate threshold must be within [0, 1], got {value}"))]
    InvalidThreshold { value: f64 },

    /// A numeric option that must be positive was zero.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroValue { field: &'static str },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Unsupported config file format.
    #[snafu(display("Unsupported config format for {}: only .yaml/.yml supported", path.display()))]
    UnsupportedFormat { path: std::path::PathBuf },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Failed to parse the metrics address.
    #[snafu(display("Failed to parse metrics address '{address}': {source}"))]
    AddressParse {
        address: String,
        source: std::net::AddrParseError,
    },

    /// Metrics server already initialized (double-init attempted).
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Metrics server not initialized (controller accessed before init).
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}
