//! Domain model types for generation runs.
//!
//! These types describe what a run did to each file and summarize the run as
//! a whole; they are what callers (and any reporting surface above this
//! crate) consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merge::ConflictRegion;

// ---------------------------------------------------------------------------
// Per-file outcome
// ---------------------------------------------------------------------------

/// What the pipeline did with a single emitted file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileOutcome {
    /// Candidate written verbatim (untracked first write, or no manual edit).
    WrittenClean,
    /// Manual edits were merged with the fresh candidate, no conflict.
    WrittenMerged,
    /// Automatic merge failed; output contains conflict markers.
    WrittenWithConflict,
    /// Path excluded by the reconcile policy; nothing written.
    SkippedPolicy,
    /// Reconciliation failed; the file was left untouched.
    SkippedError,
}

impl std::fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrittenClean => write!(f, "written-clean"),
            Self::WrittenMerged => write!(f, "written-merged"),
            Self::WrittenWithConflict => write!(f, "written-with-conflict"),
            Self::SkippedPolicy => write!(f, "skipped-policy"),
            Self::SkippedError => write!(f, "skipped-error"),
        }
    }
}

/// Per-file result entry in a [`RunReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    /// Relative path of the emitted file.
    pub path: String,
    /// What happened to it.
    pub outcome: FileOutcome,
    /// User-visible warning (set for conflicted files).
    pub warning: Option<String>,
    /// Error detail (set for skipped-error files).
    pub error: Option<String>,
    /// Line ranges of conflict-marker blocks in the written output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflict_regions: Vec<ConflictRegion>,
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Aggregated counts for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounts {
    pub written_clean: usize,
    pub written_merged: usize,
    pub written_with_conflict: usize,
    pub skipped_policy: usize,
    pub skipped_error: usize,
}

impl RunCounts {
    /// Tally a single outcome.
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::WrittenClean => self.written_clean += 1,
            FileOutcome::WrittenMerged => self.written_merged += 1,
            FileOutcome::WrittenWithConflict => self.written_with_conflict += 1,
            FileOutcome::SkippedPolicy => self.skipped_policy += 1,
            FileOutcome::SkippedError => self.skipped_error += 1,
        }
    }

    /// Total number of files the run considered.
    pub fn total(&self) -> usize {
        self.written_clean
            + self.written_merged
            + self.written_with_conflict
            + self.skipped_policy
            + self.skipped_error
    }
}

/// The result of one full generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run ID.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-file entries, sorted by path.
    pub files: Vec<FileReport>,
    /// Aggregated outcome counts.
    pub counts: RunCounts,
    /// Paths that failed to reconcile (subset of `files` with errors).
    pub failed_paths: Vec<String>,
    /// Tracked paths the current emitter output no longer produces.
    ///
    /// Reported, never deleted: removal stays an explicit untrack decision.
    pub stale_paths: Vec<String>,
    /// Whether the run was interrupted by the cancellation signal.
    pub cancelled: bool,
}

impl RunReport {
    /// Create an empty report with a fresh run ID.
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            files: Vec::new(),
            counts: RunCounts::default(),
            failed_paths: Vec::new(),
            stale_paths: Vec::new(),
            cancelled: false,
        }
    }

    /// `true` if every considered file was written without conflict or error.
    pub fn is_clean(&self) -> bool {
        self.counts.written_with_conflict == 0 && self.counts.skipped_error == 0
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
