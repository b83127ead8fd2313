//! Per-file accounting across dispatchers and shard workers.
//!
//! A file is finalized once its dispatcher has finished and every shard in
//! the table has reported a tally for it, including shards that received no
//! records. Finalization happens at most once per file.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::FileId;
use super::completion::{CompletionPolicy, FileOutcome};
use crate::config::ShardKey;
use flurry_core::metrics::events::FileStatus;

/// Records a shard worker handled for one file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShardTally {
    pub processed: u64,
    pub errors: u64,
}

/// What a dispatcher observed while reading one file.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSummary {
    pub file: FileId,
    pub path: PathBuf,
    /// Non-blank lines read.
    pub lines_read: u64,
    pub decode_errors: u64,
    pub routing_errors: u64,
    /// Set when the file could not be read to the end.
    pub fatal: Option<String>,
}

impl DispatchSummary {
    pub fn new(file: FileId, path: PathBuf) -> Self {
        Self {
            file,
            path,
            lines_read: 0,
            decode_errors: 0,
            routing_errors: 0,
            fatal: None,
        }
    }
}

/// Contributions sent to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEvent {
    /// A dispatcher opened a source.
    Opened { file: FileId, path: PathBuf },
    /// A shard finished all records it received for a file.
    ShardReported {
        file: FileId,
        shard: ShardKey,
        tally: ShardTally,
    },
    /// A dispatcher stopped reading a file.
    DispatchFinished(DispatchSummary),
}

/// Final counts for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStats {
    pub path: PathBuf,
    pub lines_read: u64,
    pub decode_errors: u64,
    pub routing_errors: u64,
    pub shard_results: IndexMap<ShardKey, ShardTally>,
    pub fatal: Option<String>,
}

impl FileStats {
    /// Lines that reached a shard.
    pub fn total_processed(&self) -> u64 {
        self.lines_read
            .saturating_sub(self.decode_errors)
            .saturating_sub(self.routing_errors)
    }

    pub fn shard_errors(&self) -> u64 {
        self.shard_results.values().map(|t| t.errors).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.decode_errors + self.routing_errors + self.shard_errors()
    }

    /// Errors per processed record, or `None` when nothing was processed.
    pub fn error_rate(&self) -> Option<f64> {
        match self.total_processed() {
            0 => None,
            processed => Some(self.total_errors() as f64 / processed as f64),
        }
    }
}

/// Running totals over all finalized files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStats {
    pub files_accepted: u64,
    pub files_rejected: u64,
    pub lines_read: u64,
    pub processed: u64,
    pub errors: u64,
}

impl AggregateStats {
    pub fn add(&mut self, outcome: &FileOutcome) {
        match outcome.status {
            FileStatus::Accepted => self.files_accepted += 1,
            FileStatus::Rejected => self.files_rejected += 1,
        }
        self.lines_read += outcome.stats.lines_read;
        self.processed += outcome.stats.total_processed();
        self.errors += outcome.stats.total_errors();
    }
}

/// Outcome of a whole run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    /// Per-file outcomes in finalization order.
    pub outcomes: Vec<FileOutcome>,
    pub totals: AggregateStats,
}

impl RunReport {
    pub fn has_rejections(&self) -> bool {
        self.totals.files_rejected > 0
    }

    pub fn outcome(&self, path: &std::path::Path) -> Option<&FileOutcome> {
        self.outcomes.iter().find(|o| o.stats.path == path)
    }

    pub fn log_summary(&self) {
        let t = &self.totals;
        info!(
            accepted = t.files_accepted,
            rejected = t.files_rejected,
            lines = t.lines_read,
            processed = t.processed,
            errors = t.errors,
            "Run finished"
        );
    }
}

#[derive(Debug, Default)]
struct FileJob {
    path: Option<PathBuf>,
    dispatch: Option<DispatchSummary>,
    shard_results: IndexMap<ShardKey, ShardTally>,
}

impl FileJob {
    fn into_stats(self, fatal_if_incomplete: Option<String>) -> FileStats {
        let path = self.path.unwrap_or_default();
        match self.dispatch {
            Some(d) => FileStats {
                path: d.path,
                lines_read: d.lines_read,
                decode_errors: d.decode_errors,
                routing_errors: d.routing_errors,
                shard_results: self.shard_results,
                fatal: d.fatal.or(fatal_if_incomplete),
            },
            None => FileStats {
                path,
                lines_read: 0,
                decode_errors: 0,
                routing_errors: 0,
                shard_results: self.shard_results,
                fatal: fatal_if_incomplete,
            },
        }
    }
}

/// Collects contributions and finalizes files.
pub struct StatsAggregator {
    shard_count: usize,
    policy: CompletionPolicy,
    jobs: HashMap<FileId, FileJob>,
    finalized: HashSet<FileId>,
    report: RunReport,
}

impl StatsAggregator {
    pub fn new(shard_count: usize, policy: CompletionPolicy) -> Self {
        Self {
            shard_count,
            policy,
            jobs: HashMap::new(),
            finalized: HashSet::new(),
            report: RunReport::default(),
        }
    }

    /// Apply one event. Returns the file's stats when it became final.
    pub fn record(&mut self, event: StatsEvent) -> Option<FileStats> {
        let file = match &event {
            StatsEvent::Opened { file, .. } | StatsEvent::ShardReported { file, .. } => *file,
            StatsEvent::DispatchFinished(summary) => summary.file,
        };
        if self.finalized.contains(&file) {
            warn!(?file, "Ignoring stats for a finalized file");
            return None;
        }

        let job = self.jobs.entry(file).or_default();
        match event {
            StatsEvent::Opened { path, .. } => job.path = Some(path),
            StatsEvent::ShardReported { shard, tally, .. } => {
                job.shard_results.insert(shard, tally);
            }
            StatsEvent::DispatchFinished(summary) => job.dispatch = Some(summary),
        }

        if job.dispatch.is_some() && job.shard_results.len() >= self.shard_count {
            let job = self.jobs.remove(&file)?;
            self.finalized.insert(file);
            return Some(job.into_stats(None));
        }
        None
    }

    /// Decide and apply the completion policy for a finalized file.
    pub async fn complete(&mut self, stats: FileStats) {
        let outcome = self.policy.complete(stats).await;
        self.report.totals.add(&outcome);
        self.report.outcomes.push(outcome);
    }

    /// Consume events until every sender is gone, then build the report.
    ///
    /// Files that never received all contributions are rejected.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<StatsEvent>) -> RunReport {
        while let Some(event) = rx.recv().await {
            if let Some(stats) = self.record(event) {
                self.complete(stats).await;
            }
        }

        let mut pending: Vec<(FileId, FileJob)> = self.jobs.drain().collect();
        pending.sort_by_key(|(file, _)| *file);
        for (file, job) in pending {
            warn!(?file, "File was not reported by every shard");
            self.finalized.insert(file);
            let stats = job.into_stats(Some("not every shard reported".to_string()));
            self.complete(stats).await;
        }

        self.report
    }
}
