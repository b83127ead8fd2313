//! Error types for the flurry loader.

use std::path::PathBuf;

use snafu::prelude::*;

// Re-export common errors
pub use flurry_core::error::{ConfigError, MetricsError};

/// Errors that can occur while opening and streaming a source file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The source file could not be opened.
    #[snafu(display("Failed to open {}: {source}", path.display()))]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The decompressor could not be created or the stream is corrupt.
    #[snafu(display("Failed to decompress {} ({codec}): {source}", path.display()))]
    Decompress {
        path: PathBuf,
        codec: &'static str,
        source: std::io::Error,
    },
}

/// Errors from the value codec.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// Failed to encode a value.
    #[snafu(display("Failed to encode value: {source}"))]
    Encode { source: prost::EncodeError },

    /// Failed to decode a value.
    #[snafu(display("Failed to decode value: {source}"))]
    Decode { source: prost::DecodeError },

    /// A self-test line could not be decoded as a record.
    #[snafu(display("Self-test line is not a valid record ({reason}): {line:?}"))]
    SampleLine { line: String, reason: &'static str },

    /// A value did not survive an encode/decode round trip.
    #[snafu(display("Value for key '{key}' changed after a round trip"))]
    Mismatch { key: String },
}

/// Errors from a key-value store endpoint.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Failed to connect to the endpoint.
    #[snafu(display("Failed to connect to {address}: {source}"))]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// An operation did not finish within the socket timeout.
    #[snafu(display("Timed out writing to {address}"))]
    Timeout { address: String },

    /// I/O failure on an established connection.
    #[snafu(display("I/O error talking to {address}: {source}"))]
    Io {
        address: String,
        source: std::io::Error,
    },

    /// The endpoint answered with something other than success.
    #[snafu(display("{address} rejected write: {response}"))]
    Rejected { address: String, response: String },

    /// The key cannot be sent over the protocol.
    #[snafu(display("Invalid key {key:?}"))]
    InvalidKey { key: String },
}

impl StoreError {
    /// Whether retrying the same write might succeed.
    ///
    /// Connection-level failures are transient. A protocol-level refusal or a
    /// bad key is not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Connect { .. } | StoreError::Timeout { .. } | StoreError::Io { .. } => {
                true
            }
            StoreError::Rejected { response, .. } => response.starts_with("SERVER_ERROR"),
            StoreError::InvalidKey { .. } => false,
        }
    }
}

/// Errors raised while marking an accepted source as done.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompletionError {
    /// The source path has no file name to prefix.
    #[snafu(display("Source path {} has no file name", path.display()))]
    NoFileName { path: PathBuf },

    /// The rename itself failed.
    #[snafu(display("Failed to rename {} to {}: {source}", from.display(), to.display()))]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// Top-level errors that abort a run.
///
/// Per-record and per-file failures never surface here; they are counted and
/// reported in the run report instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },

    /// Codec error.
    #[snafu(display("Codec error: {source}"))]
    Codec { source: CodecError },

    /// Source pattern could not be compiled.
    #[snafu(display("Invalid source pattern '{pattern}': {source}"))]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    /// Source directory could not be listed.
    #[snafu(display("Failed to list {}: {source}", dir.display()))]
    Discovery {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<MetricsError> for PipelineError {
    fn from(source: MetricsError) -> Self {
        PipelineError::Metrics { source }
    }
}

impl From<CodecError> for PipelineError {
    fn from(source: CodecError) -> Self {
        PipelineError::Codec { source }
    }
}
