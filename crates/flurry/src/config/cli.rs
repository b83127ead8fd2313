//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use super::{LoaderConfig, ShardKey};
use crate::error::ConfigError;

#[derive(Parser, Debug, Default)]
#[command(version, about = "Load device install logs into sharded memcached")]
pub struct CliArgs {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Source file pattern (overrides `source.pattern`)
    #[arg(long)]
    pub pattern: Option<String>,

    /// Decode and encode records without writing to the store
    #[arg(long)]
    pub dry: bool,

    /// Append log output to this file instead of stderr
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Run the value codec self-test and exit
    #[arg(short, long)]
    pub test: bool,

    /// Address of the idfa shard
    #[arg(long)]
    pub idfa: Option<String>,

    /// Address of the gaid shard
    #[arg(long)]
    pub gaid: Option<String>,

    /// Address of the adid shard
    #[arg(long)]
    pub adid: Option<String>,

    /// Address of the dvid shard
    #[arg(long)]
    pub dvid: Option<String>,
}

impl CliArgs {
    /// Build the effective configuration: file (or defaults), then flags.
    pub fn load_config(&self) -> Result<LoaderConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_file(path)?,
            None => LoaderConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply flag overrides on top of `config`.
    pub fn apply(&self, config: &mut LoaderConfig) {
        if let Some(pattern) = &self.pattern {
            config.source.pattern = pattern.clone();
        }
        if self.dry {
            config.pipeline.dry_run = true;
        }

        let overrides = [
            ("idfa", &self.idfa),
            ("gaid", &self.gaid),
            ("adid", &self.adid),
            ("dvid", &self.dvid),
        ];
        for (key, address) in overrides {
            if let Some(address) = address {
                config.shards.insert(ShardKey::new(key), address.clone());
            }
        }
    }

    /// Default log level: `debug` when the effective configuration is a dry
    /// run. Falls back to the `--dry` flag when no configuration loaded.
    pub fn log_level(&self, config: Option<&LoaderConfig>) -> &'static str {
        let dry_run = config.map_or(self.dry, |c| c.pipeline.dry_run);
        if dry_run { "debug" } else { "info" }
    }
}
