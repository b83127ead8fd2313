//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the loader.
//! Per-shard events carry a `shard` label (`idfa`, `gaid`, ...). File paths
//! are never used as labels.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Non-blank lines read from a source file.
pub struct LinesRead {
    pub count: u64,
}

impl InternalEvent for LinesRead {
    fn emit(self) {
        trace!(count = self.count, "Lines read");
        counter!("flurry_lines_read_total").increment(self.count);
    }
}

/// Records handed to a shard queue.
pub struct RecordsDispatched {
    pub count: u64,
    pub shard: String,
}

impl InternalEvent for RecordsDispatched {
    fn emit(self) {
        trace!(count = self.count, shard = %self.shard, "Records dispatched");
        counter!("flurry_records_dispatched_total", "shard" => self.shard).increment(self.count);
    }
}

/// Records committed to (or, in dry mode, accepted for) a shard endpoint.
pub struct RecordsStored {
    pub count: u64,
    pub shard: String,
}

impl InternalEvent for RecordsStored {
    fn emit(self) {
        trace!(count = self.count, shard = %self.shard, "Records stored");
        counter!("flurry_records_stored_total", "shard" => self.shard).increment(self.count);
    }
}

/// Stage at which a record was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Decode,
    Routing,
    Codec,
    Store,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Decode => "decode",
            FailureStage::Routing => "routing",
            FailureStage::Codec => "codec",
            FailureStage::Store => "store",
        }
    }
}

/// A record that was counted as an error.
pub struct RecordFailed {
    pub stage: FailureStage,
}

impl InternalEvent for RecordFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Record failed");
        counter!("flurry_records_failed_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Final status of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Accepted,
    Rejected,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Accepted => "accepted",
            FileStatus::Rejected => "rejected",
        }
    }
}

/// A source file reached a completion decision.
pub struct FileFinished {
    pub status: FileStatus,
}

impl InternalEvent for FileFinished {
    fn emit(self) {
        trace!(status = self.status.as_str(), "File finished");
        counter!("flurry_files_finished_total", "status" => self.status.as_str()).increment(1);
    }
}

// ============================================================================
// Gauges
// ============================================================================

/// Records waiting in a shard queue.
pub struct ShardQueueDepth {
    pub depth: usize,
    pub shard: String,
}

impl InternalEvent for ShardQueueDepth {
    fn emit(self) {
        gauge!("flurry_shard_queue_depth", "shard" => self.shard).set(self.depth as f64);
    }
}

/// Records holding an in-flight permit across all shards.
pub struct InFlightRecords {
    pub count: usize,
}

impl InternalEvent for InFlightRecords {
    fn emit(self) {
        gauge!("flurry_in_flight_records").set(self.count as f64);
    }
}

// ============================================================================
// Histograms
// ============================================================================

/// One store write attempt finished (success or failure).
pub struct StoreWriteCompleted {
    pub duration: Duration,
    pub shard: String,
}

impl InternalEvent for StoreWriteCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            shard = %self.shard,
            "Store write completed"
        );
        histogram!("flurry_store_write_duration_seconds", "shard" => self.shard)
            .record(self.duration.as_secs_f64());
    }
}

/// A source file was fully read and decompressed.
pub struct FileReadCompleted {
    pub duration: Duration,
}

impl InternalEvent for FileReadCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "File read completed");
        histogram!("flurry_file_read_duration_seconds").record(self.duration.as_secs_f64());
    }
}
