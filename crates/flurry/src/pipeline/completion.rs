//! Completion policy: accept or reject a finalized file.
//!
//! An accepted source is renamed in place with [`DONE_PREFIX`] prepended to
//! its file name, which hides it from later discovery. A rejected source is
//! left untouched so the next run retries it.

use std::path::{Path, PathBuf};

use snafu::prelude::*;
use tracing::{error, info, warn};

use super::stats::FileStats;
use crate::error::{CompletionError, NoFileNameSnafu, RenameSnafu};
use crate::source::DONE_PREFIX;
use flurry_core::emit;
use flurry_core::metrics::events::{FileFinished, FileStatus};

/// Final decision for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub stats: FileStats,
    pub status: FileStatus,
    /// Where the source was moved, if it was renamed.
    pub done_path: Option<PathBuf>,
}

/// Accepts files whose error rate is within the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionPolicy {
    threshold: f64,
}

impl CompletionPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Accept or reject without side effects.
    pub fn decide(&self, stats: &FileStats) -> FileStatus {
        if stats.fatal.is_some() {
            return FileStatus::Rejected;
        }
        match stats.error_rate() {
            None => FileStatus::Accepted,
            Some(rate) if rate <= self.threshold => FileStatus::Accepted,
            Some(_) => FileStatus::Rejected,
        }
    }

    /// Decide, rename accepted sources, and log the result.
    ///
    /// A failed rename turns the outcome into a rejection.
    pub async fn complete(&self, stats: FileStats) -> FileOutcome {
        let mut status = self.decide(&stats);
        let mut done_path = None;
        let file = stats.path.display();

        match (status, stats.error_rate()) {
            (_, _) if stats.fatal.is_some() => {
                error!(
                    file = %file,
                    reason = stats.fatal.as_deref().unwrap_or_default(),
                    "Failed load"
                );
            }
            (FileStatus::Accepted, Some(rate)) => {
                info!(file = %file, rate, "Acceptable error rate, successful load");
            }
            (FileStatus::Accepted, None) => {
                info!(file = %file, "No records processed");
            }
            (FileStatus::Rejected, rate) => {
                error!(
                    file = %file,
                    rate = rate.unwrap_or_default(),
                    threshold = self.threshold,
                    "High error rate, failed load"
                );
            }
        }

        if status == FileStatus::Accepted {
            match mark_done(&stats.path).await {
                Ok(path) => done_path = Some(path),
                Err(e) => {
                    warn!(error = %e, "Could not mark source as done");
                    status = FileStatus::Rejected;
                }
            }
        }

        emit!(FileFinished { status });
        FileOutcome {
            stats,
            status,
            done_path,
        }
    }
}

/// Path an accepted source is renamed to: same directory, prefixed name.
pub fn done_path(path: &Path) -> Result<PathBuf, CompletionError> {
    let name = path.file_name().context(NoFileNameSnafu { path })?;
    let mut done = std::ffi::OsString::from(DONE_PREFIX.to_string());
    done.push(name);
    Ok(path.with_file_name(done))
}

/// Rename `path` to its done form.
pub async fn mark_done(path: &Path) -> Result<PathBuf, CompletionError> {
    let to = done_path(path)?;
    tokio::fs::rename(path, &to).await.context(RenameSnafu {
        from: path,
        to: &to,
    })?;
    Ok(to)
}
