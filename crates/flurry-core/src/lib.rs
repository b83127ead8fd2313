//! flurry-core: Shared infrastructure for the flurry loader.
//!
//! This crate holds the pieces that are not specific to how records are
//! decoded or where they are written:
//!
//! - `config/` - YAML loading with environment variable interpolation
//! - `metrics/` - Prometheus metrics infrastructure and internal events
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Subscriber setup for the CLI
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod tracing;

// Re-export commonly used items
pub use config::{InterpolationResult, MetricsConfig, interpolate, load_yaml_file};
pub use error::{ConfigError, MetricsError};
pub use metrics::{MetricsController, init_global as init_metrics};
pub use signal::shutdown_signal;
pub use tracing::init_tracing;
