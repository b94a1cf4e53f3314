use crate::scanner::ParseFailure;
use serde::Serialize;
use std::fmt;

/// Sweep stage a summary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uploads,
    Repos,
    Blobs,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Uploads => "uploads",
            Stage::Repos => "repos",
            Stage::Blobs => "blobs",
        })
    }
}

/// A repository or blob that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub target: String,
    pub cause: String,
}

/// Report of one sweep stage.
///
/// Under the collect failure policy a stage can partially succeed; the
/// summary is how that is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub stage: Stage,
    pub dry_run: bool,
    pub cancelled: bool,
    pub repositories_scanned: usize,
    /// Repositories (or blobs) classified as deletable.
    pub deletable: usize,
    /// Deleted targets, or the ones that would have been in a dry run.
    pub deleted: Vec<String>,
    /// Deletable targets with nothing left to remove.
    pub already_absent: usize,
    pub failures: Vec<FailedDeletion>,
    /// Repositories left alone because some of their keys did not parse.
    pub tainted: Vec<String>,
    pub parse_failures: Vec<ParseFailure>,
    pub blobs_scanned: usize,
    pub bytes_freed: u64,
}

impl SweepSummary {
    pub fn new(stage: Stage, dry_run: bool) -> Self {
        Self {
            stage,
            dry_run,
            cancelled: false,
            repositories_scanned: 0,
            deletable: 0,
            deleted: Vec::new(),
            already_absent: 0,
            failures: Vec::new(),
            tainted: Vec::new(),
            parse_failures: Vec::new(),
            blobs_scanned: 0,
            bytes_freed: 0,
        }
    }

    /// No deletion failed and the stage ran to completion.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn record_failure(&mut self, target: impl Into<String>, cause: impl Into<String>) {
        self.failures.push(FailedDeletion {
            target: target.into(),
            cause: cause.into(),
        });
    }

    pub fn log(&self) {
        tracing::info!(
            stage = %self.stage,
            dry_run = self.dry_run,
            "=== Sweep Summary ==="
        );
        tracing::info!(
            stage = %self.stage,
            "Repositories: {} scanned, {} deletable, {} deleted, {} already absent",
            self.repositories_scanned,
            self.deletable,
            self.deleted.len(),
            self.already_absent
        );
        if self.stage == Stage::Blobs {
            tracing::info!(
                stage = %self.stage,
                "Blobs: {} scanned, {} bytes freed",
                self.blobs_scanned,
                self.bytes_freed
            );
        }
        if !self.tainted.is_empty() || !self.parse_failures.is_empty() {
            tracing::warn!(
                stage = %self.stage,
                tainted = ?self.tainted,
                "Skipped {} malformed key(s), {} repository(ies) left untouched",
                self.parse_failures.len(),
                self.tainted.len()
            );
        }
        for failure in &self.failures {
            tracing::error!(
                stage = %self.stage,
                target = %failure.target,
                cause = %failure.cause,
                "Deletion failed"
            );
        }
        if self.cancelled {
            tracing::warn!(stage = %self.stage, "Stage was cancelled before completion");
        }
    }
}
