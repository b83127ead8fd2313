//! flurry CLI: loads device install logs into sharded memcached.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flurry::record::self_test;
use flurry::source::list_sources;
use flurry::store::MemcacheFactory;
use flurry::{CliArgs, init_metrics, init_tracing, run_pipeline, shutdown_signal};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = args.load_config();

    let log_level = args.log_level(config.as_ref().ok());
    if let Err(e) = init_tracing(log_level, args.log.as_deref()) {
        eprintln!("Failed to open log file: {e}");
        return ExitCode::FAILURE;
    }

    if args.test {
        return match self_test() {
            Ok(()) => {
                info!("Codec self-test passed");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Codec self-test failed: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(address) = &config.metrics.address
        && let Err(e) = init_metrics(address)
    {
        error!("Failed to start metrics endpoint: {e}");
        return ExitCode::FAILURE;
    }

    let files = match list_sources(&config.source.pattern) {
        Ok(files) => files,
        Err(e) => {
            error!("Failed to list sources: {e}");
            return ExitCode::FAILURE;
        }
    };
    if files.is_empty() {
        warn!(pattern = %config.source.pattern, "No source files matched");
        return ExitCode::SUCCESS;
    }

    for (key, address) in &config.shards {
        info!("  Shard: {} -> {}", key, address);
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let stores = MemcacheFactory::new(&config.store);
    match run_pipeline(&config, files, &stores, shutdown).await {
        Ok(report) if report.has_rejections() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Pipeline failed: {e}");
            ExitCode::FAILURE
        }
    }
}
