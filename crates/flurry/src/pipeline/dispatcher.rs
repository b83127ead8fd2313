//! Dispatcher: streams one source file into the shard queues.
//!
//! Each record first takes a permit from the global in-flight limiter and is
//! then queued on its shard, waiting while that queue is full. The permit
//! travels with the record and is released by the worker.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::FileId;
use super::shard::{ShardMessage, ShardTable};
use super::stats::{DispatchSummary, StatsEvent};
use crate::record::{AppIdPolicy, decode};
use crate::source::{LineReader, spawn_read_task};
use flurry_core::emit;
use flurry_core::metrics::events::{
    FailureStage, InFlightRecords, RecordFailed, RecordsDispatched, ShardQueueDepth,
};

/// Shared state every dispatcher of a run needs.
#[derive(Clone)]
pub struct DispatchContext {
    pub shards: Arc<ShardTable>,
    pub in_flight: Arc<Semaphore>,
    pub max_in_flight: usize,
    pub reader: Arc<LineReader>,
    pub stats_tx: mpsc::UnboundedSender<StatsEvent>,
    pub app_ids: AppIdPolicy,
    pub progress_interval: u64,
    pub shutdown: CancellationToken,
}

/// Routes the records of one file.
pub struct Dispatcher {
    file: FileId,
    path: PathBuf,
    ctx: DispatchContext,
    summary: DispatchSummary,
    /// Records queued per shard since the last flush, by table position.
    dispatched: Vec<u64>,
}

impl Dispatcher {
    pub fn new(file: FileId, path: PathBuf, ctx: DispatchContext) -> Self {
        let dispatched = vec![0; ctx.shards.len()];
        Self {
            file,
            summary: DispatchSummary::new(file, path.clone()),
            path,
            ctx,
            dispatched,
        }
    }

    /// Read, decode and route the whole file, then mark it complete on every
    /// shard and report the dispatcher's counters.
    pub async fn run(mut self) -> DispatchSummary {
        info!(file = %self.path.display(), "Processing source");
        self.send_stats(StatsEvent::Opened {
            file: self.file,
            path: self.path.clone(),
        });

        if let Err(reason) = self.dispatch_all().await {
            error!(file = %self.path.display(), reason = %reason, "Aborting source");
            self.summary.fatal = Some(reason);
        }
        self.flush_metrics();

        self.complete_on_all_shards().await;

        let summary = std::mem::replace(
            &mut self.summary,
            DispatchSummary::new(self.file, self.path.clone()),
        );
        debug!(
            file = %self.path.display(),
            lines = summary.lines_read,
            decode_errors = summary.decode_errors,
            routing_errors = summary.routing_errors,
            "Finished dispatching"
        );
        self.send_stats(StatsEvent::DispatchFinished(summary.clone()));
        summary
    }

    async fn dispatch_all(&mut self) -> Result<(), String> {
        let mut chunks = spawn_read_task(self.ctx.reader.clone(), self.path.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = self.ctx.shutdown.cancelled() => return Err(shutdown_reason()),
                next = chunks.recv() => next,
            };
            let chunk = match next {
                None => return Ok(()),
                Some(Err(e)) => return Err(e.to_string()),
                Some(Ok(chunk)) => chunk,
            };

            for _ in 0..chunk.invalid_utf8 {
                self.count_line();
                self.summary.decode_errors += 1;
                emit!(RecordFailed {
                    stage: FailureStage::Decode,
                });
            }
            for line in &chunk.lines {
                self.count_line();
                self.dispatch_line(line).await?;
            }
            self.flush_metrics();
        }
    }

    fn count_line(&mut self) {
        self.summary.lines_read += 1;
        let interval = self.ctx.progress_interval;
        if interval > 0 && self.summary.lines_read % interval == 0 {
            info!(
                file = %self.path.display(),
                lines = self.summary.lines_read,
                "Progress"
            );
        }
    }

    async fn dispatch_line(&mut self, line: &str) -> Result<(), String> {
        let record = match decode(line, self.ctx.app_ids) {
            Ok(record) => record,
            Err(failure) => {
                self.summary.decode_errors += 1;
                debug!(reason = failure.as_str(), line, "Skipping undecodable line");
                emit!(RecordFailed {
                    stage: FailureStage::Decode,
                });
                return Ok(());
            }
        };

        let Some((index, shard)) = self.ctx.shards.resolve(&record.dev_type) else {
            self.summary.routing_errors += 1;
            debug!(dev_type = %record.dev_type, "Unknown destination key");
            emit!(RecordFailed {
                stage: FailureStage::Routing,
            });
            return Ok(());
        };

        let permit = tokio::select! {
            biased;
            _ = self.ctx.shutdown.cancelled() => return Err(shutdown_reason()),
            permit = self.ctx.in_flight.clone().acquire_owned() => {
                permit.map_err(|_| "in-flight limiter closed".to_string())?
            }
        };

        let message = ShardMessage::Record {
            file: self.file,
            record,
            permit,
        };
        tokio::select! {
            biased;
            _ = self.ctx.shutdown.cancelled() => return Err(shutdown_reason()),
            sent = shard.enqueue(message) => {
                sent.map_err(|_| format!("shard {} stopped accepting records", shard.key()))?
            }
        }

        self.dispatched[index] += 1;
        Ok(())
    }

    /// Send one completion marker per shard, even after a fatal error, so
    /// that every shard reports a tally for this file.
    async fn complete_on_all_shards(&self) {
        for shard in self.ctx.shards.iter() {
            let marker = ShardMessage::FileComplete { file: self.file };
            if shard.enqueue(marker).await.is_err() {
                warn!(
                    file = %self.path.display(),
                    shard = %shard.key(),
                    "Shard worker gone, file cannot be finalized"
                );
            }
        }
    }

    fn flush_metrics(&mut self) {
        for (shard, count) in self.ctx.shards.iter().zip(self.dispatched.iter_mut()) {
            if *count > 0 {
                emit!(RecordsDispatched {
                    count: *count,
                    shard: shard.key().to_string(),
                });
                *count = 0;
            }
            emit!(ShardQueueDepth {
                depth: shard.queue_depth(),
                shard: shard.key().to_string(),
            });
        }
        emit!(InFlightRecords {
            count: self.ctx.max_in_flight - self.ctx.in_flight.available_permits(),
        });
    }

    fn send_stats(&self, event: StatsEvent) {
        if self.ctx.stats_tx.send(event).is_err() {
            warn!(file = %self.path.display(), "Stats aggregator is gone");
        }
    }
}

fn shutdown_reason() -> String {
    "shutdown requested".to_string()
}
