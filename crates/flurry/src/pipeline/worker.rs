//! Shard worker: drains one shard queue into its store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::FileId;
use super::shard::{ShardInbox, ShardMessage};
use super::stats::{ShardTally, StatsEvent};
use crate::config::{ShardKey, StoreConfig};
use crate::error::StoreError;
use crate::record::{Record, encode_record};
use crate::store::KeyValueStore;
use flurry_core::emit;
use flurry_core::metrics::events::{
    FailureStage, RecordFailed, RecordsStored, StoreWriteCompleted,
};

/// Bounded retry for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// A single attempt per record.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Delay before retry number `retry` (0-based): exponential with up to
    /// 50% random jitter added.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.backoff.saturating_mul(2u32.saturating_pow(retry));
        let jitter_ms = (base.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Totals for one worker over a whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: u64,
    pub errors: u64,
}

/// Single consumer of one shard queue.
pub struct ShardWorker {
    key: ShardKey,
    store: Box<dyn KeyValueStore>,
    rx: mpsc::Receiver<ShardMessage>,
    stats_tx: mpsc::UnboundedSender<StatsEvent>,
    dry_run: bool,
    retry: RetryPolicy,
    tallies: HashMap<FileId, ShardTally>,
    summary: WorkerSummary,
}

impl ShardWorker {
    pub fn new(
        inbox: ShardInbox,
        store: Box<dyn KeyValueStore>,
        stats_tx: mpsc::UnboundedSender<StatsEvent>,
        dry_run: bool,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            key: inbox.key,
            store,
            rx: inbox.rx,
            stats_tx,
            dry_run,
            retry,
            tallies: HashMap::new(),
            summary: WorkerSummary::default(),
        }
    }

    pub fn spawn(self) -> JoinHandle<WorkerSummary> {
        tokio::spawn(self.run())
    }

    /// Process messages until `Shutdown` (or every sender is dropped).
    pub async fn run(mut self) -> WorkerSummary {
        debug!(shard = %self.key, address = self.store.address(), "Shard worker started");

        while let Some(message) = self.rx.recv().await {
            match message {
                ShardMessage::Record {
                    file,
                    record,
                    permit,
                } => {
                    let ok = self.handle_record(&record).await;
                    let tally = self.tallies.entry(file).or_default();
                    if ok {
                        tally.processed += 1;
                        self.summary.processed += 1;
                    } else {
                        tally.errors += 1;
                        self.summary.errors += 1;
                    }
                    drop(permit);
                }
                ShardMessage::FileComplete { file } => {
                    let tally = self.tallies.remove(&file).unwrap_or_default();
                    let event = StatsEvent::ShardReported {
                        file,
                        shard: self.key.clone(),
                        tally,
                    };
                    if self.stats_tx.send(event).is_err() {
                        warn!(shard = %self.key, "Stats aggregator is gone");
                    }
                }
                ShardMessage::Shutdown => break,
            }
        }

        info!(
            shard = %self.key,
            processed = self.summary.processed,
            errors = self.summary.errors,
            "Shard worker finished"
        );
        self.summary
    }

    /// Encode and write one record. Returns whether it counts as processed.
    async fn handle_record(&mut self, record: &Record) -> bool {
        let payload = match encode_record(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(shard = %self.key, key = %record.key(), error = %e, "Failed to encode record");
                emit!(RecordFailed {
                    stage: FailureStage::Codec,
                });
                return false;
            }
        };

        if self.dry_run {
            debug!(
                shard = %self.key,
                address = self.store.address(),
                key = %payload.key,
                apps = record.apps.len(),
                "Dry run, skipping write"
            );
        } else if let Err(e) = self.put_with_retry(&payload.key, &payload.value).await {
            warn!(
                shard = %self.key,
                address = self.store.address(),
                key = %payload.key,
                error = %e,
                "Failed to store record"
            );
            emit!(RecordFailed {
                stage: FailureStage::Store,
            });
            return false;
        }

        emit!(RecordsStored {
            count: 1,
            shard: self.key.to_string(),
        });
        true
    }

    async fn put_with_retry(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut retry = 0;
        loop {
            let start = Instant::now();
            let result = self.store.put(key, value).await;
            emit!(StoreWriteCompleted {
                duration: start.elapsed(),
                shard: self.key.to_string(),
            });

            match result {
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay(retry);
                    debug!(shard = %self.key, key, retry, ?delay, error = %e, "Retrying write");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }
}
