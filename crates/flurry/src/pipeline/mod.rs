//! Fan-out load pipeline.
//!
//! ```text
//!  file ─► Dispatcher ─┬─► [idfa queue] ─► ShardWorker ─► store
//!  file ─► Dispatcher ─┼─► [gaid queue] ─► ShardWorker ─► store
//!                      └─► ...                 │
//!            │                                 ▼
//!            └──────────► StatsAggregator ◄────┘ ─► CompletionPolicy
//! ```
//!
//! Workers live for the whole run. Dispatchers run up to
//! `source.max_concurrent_files` at a time and share a global in-flight
//! limiter.

mod completion;
mod dispatcher;
mod shard;
mod stats;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use snafu::ResultExt;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::LoaderConfig;
use crate::error::{PipelineError, TaskJoinSnafu};
use crate::record::AppIdPolicy;
use crate::source::LineReader;
use crate::store::StoreFactory;

pub use completion::{CompletionPolicy, FileOutcome, done_path, mark_done};
pub use dispatcher::{DispatchContext, Dispatcher};
pub use flurry_core::metrics::events::FileStatus;
pub use shard::{Shard, ShardClosed, ShardInbox, ShardMessage, ShardTable};
pub use stats::{
    AggregateStats, DispatchSummary, FileStats, RunReport, ShardTally, StatsAggregator,
    StatsEvent,
};
pub use worker::{RetryPolicy, ShardWorker, WorkerSummary};

/// Identifies one source file within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

/// Load `files` into the configured shards and report every file's outcome.
///
/// Duplicate paths are loaded once. Per-record and per-file failures are
/// part of the report; only infrastructure failures return an error.
pub async fn run_pipeline(
    config: &LoaderConfig,
    files: Vec<PathBuf>,
    stores: &dyn StoreFactory,
    shutdown: CancellationToken,
) -> Result<RunReport, PipelineError> {
    let files: IndexSet<PathBuf> = files.into_iter().collect();
    let settings = &config.pipeline;

    let (table, inboxes) = ShardTable::build(&config.shards, settings.queue_capacity);
    let shards = Arc::new(table);

    let (stats_tx, stats_rx) = mpsc::unbounded_channel();
    let policy = CompletionPolicy::new(settings.error_rate_threshold);
    let aggregator = tokio::spawn(StatsAggregator::new(shards.len(), policy).run(stats_rx));

    let retry = RetryPolicy::from_config(&config.store);
    let workers: Vec<_> = inboxes
        .into_iter()
        .map(|inbox| {
            let store = stores.create(&inbox.key, &inbox.address);
            ShardWorker::new(inbox, store, stats_tx.clone(), settings.dry_run, retry).spawn()
        })
        .collect();

    info!(
        files = files.len(),
        shards = shards.len(),
        dry_run = settings.dry_run,
        "Starting load"
    );

    let ctx = DispatchContext {
        shards: shards.clone(),
        in_flight: Arc::new(Semaphore::new(settings.max_in_flight)),
        max_in_flight: settings.max_in_flight,
        reader: Arc::new(LineReader::new(
            config.source.batch_size,
            config.source.compression,
        )),
        stats_tx,
        app_ids: AppIdPolicy::from_strict(settings.strict_app_ids),
        progress_interval: settings.progress_interval,
        shutdown,
    };

    let dispatched: Vec<_> = stream::iter(files.into_iter().enumerate())
        .map(|(index, path)| {
            let dispatcher = Dispatcher::new(FileId(index as u64), path, ctx.clone());
            tokio::spawn(dispatcher.run())
        })
        .buffer_unordered(config.source.max_concurrent_files)
        .collect()
        .await;
    drop(ctx);

    // Every dispatcher is done, so nothing can follow the shutdown marker.
    shards.shutdown().await;
    let mut worker_results = Vec::with_capacity(workers.len());
    for worker in workers {
        worker_results.push(worker.await);
    }

    for result in dispatched {
        result.context(TaskJoinSnafu)?;
    }
    for result in worker_results {
        result.context(TaskJoinSnafu)?;
    }

    let report = aggregator.await.context(TaskJoinSnafu)?;
    report.log_summary();
    Ok(report)
}
