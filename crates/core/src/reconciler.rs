//! Per-file reconciliation orchestration.
//!
//! The reconciler ties the classifier and the structural differencer
//! together into a small per-file state machine:
//!
//! - `UNTRACKED` paths emit the candidate verbatim and become `CLEAN` on
//!   first write.
//! - `CLEAN` paths (no manual edit) stay `CLEAN` and emit the candidate.
//! - `EDITED` paths run the family differencer. A successful merge *stays*
//!   `EDITED`: the driver resets the snapshot to the unmerged candidate, so
//!   the preserved custom content is re-detected as an edit on the next run.
//! - A failed merge moves to `CONFLICTED`, which behaves like `EDITED` but
//!   carries a user-visible warning.
//!
//! A tracked path with no trustworthy snapshot degrades to a no-op merge
//! (candidate as both base and theirs): nothing can be safely compared, so
//! nothing is overwritten.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::{ChangeClassifier, EditState};
use crate::errors::ReconcileError;
use crate::merge::{ConflictRegion, Differencer};
use crate::store::ContentStore;

// ---------------------------------------------------------------------------
// File state
// ---------------------------------------------------------------------------

/// Reconciliation state of a file after processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Untracked,
    Clean,
    Edited,
    Conflicted,
}

impl std::fmt::Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Untracked => write!(f, "untracked"),
            Self::Clean => write!(f, "clean"),
            Self::Edited => write!(f, "edited"),
            Self::Conflicted => write!(f, "conflicted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// The outcome of reconciling one file.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    /// Content to write to the working file.
    pub merged_content: String,
    /// Whether automatic reconciliation surfaced a conflict.
    pub had_conflict: bool,
    /// Marker-block locations within `merged_content`.
    pub conflict_regions: Vec<ConflictRegion>,
    /// Resulting file state.
    pub state: FileState,
    /// User-visible warning, set when the state is `Conflicted`.
    pub warning: Option<String>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Stateless per-file reconciliation over a [`ContentStore`] and the
/// working tree.
pub struct Reconciler;

impl Reconciler {
    /// Reconcile the candidate content for `rel_path`.
    ///
    /// Never writes anything: the caller owns the write of
    /// `merged_content` and the snapshot/track updates.
    pub fn reconcile(
        store: &ContentStore,
        output_root: &Path,
        rel_path: &str,
        candidate: &str,
    ) -> Result<ReconciliationResult, ReconcileError> {
        if !store.is_tracked(rel_path) {
            debug!(path = rel_path, "untracked path, emitting candidate");
            return Ok(clean_result(candidate, FileState::Clean));
        }

        match ChangeClassifier::classify(store, output_root, rel_path) {
            EditState::Unmodified => {
                debug!(path = rel_path, "no manual edit, emitting candidate");
                Ok(clean_result(candidate, FileState::Clean))
            }
            EditState::Edited => {
                let working = read_working(output_root, rel_path)?;
                // Snapshot presence is implied by the Edited classification;
                // an absent one between the two reads degrades the same way
                // the classifier would have.
                match store.snapshot(rel_path) {
                    Some(base) => Ok(Self::merge_edited(rel_path, &base, &working, candidate)),
                    None => Ok(Self::missing_base(rel_path, &working, candidate)),
                }
            }
            EditState::EditedMissingBase => {
                let working = read_working(output_root, rel_path)?;
                Ok(Self::missing_base(rel_path, &working, candidate))
            }
        }
    }

    fn merge_edited(
        rel_path: &str,
        base: &str,
        working: &str,
        candidate: &str,
    ) -> ReconciliationResult {
        let outcome = Differencer::merge(rel_path, base, working, candidate);
        if outcome.had_conflict {
            warn!(path = rel_path, "automatic merge surfaced a conflict");
            ReconciliationResult {
                merged_content: outcome.content,
                had_conflict: true,
                conflict_regions: outcome.conflict_regions,
                state: FileState::Conflicted,
                warning: Some(format!(
                    "manual edits to '{}' could not be merged automatically; \
                     resolve the conflict markers before the next generation",
                    rel_path
                )),
            }
        } else {
            debug!(path = rel_path, "manual edits merged");
            ReconciliationResult {
                merged_content: outcome.content,
                had_conflict: false,
                conflict_regions: Vec::new(),
                state: FileState::Edited,
                warning: None,
            }
        }
    }

    /// Missing-snapshot degradation: no-op merge with the candidate as both
    /// base and theirs — the working copy survives untouched.
    fn missing_base(rel_path: &str, working: &str, candidate: &str) -> ReconciliationResult {
        warn!(
            path = rel_path,
            "tracked path has no usable snapshot, preserving working copy"
        );
        let outcome = Differencer::merge(rel_path, candidate, working, candidate);
        ReconciliationResult {
            merged_content: outcome.content,
            had_conflict: false,
            conflict_regions: Vec::new(),
            state: FileState::Edited,
            warning: None,
        }
    }
}

fn clean_result(candidate: &str, state: FileState) -> ReconciliationResult {
    ReconciliationResult {
        merged_content: candidate.to_string(),
        had_conflict: false,
        conflict_regions: Vec::new(),
        state,
        warning: None,
    }
}

fn read_working(output_root: &Path, rel_path: &str) -> Result<String, ReconcileError> {
    let bytes = std::fs::read(output_root.join(rel_path)).map_err(|source| {
        ReconcileError::WorkingFileRead {
            path: rel_path.to_string(),
            source,
        }
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path());
        (dir, store)
    }

    #[test]
    fn test_untracked_emits_candidate_verbatim() {
        let (dir, store) = setup();
        let result = Reconciler::reconcile(&store, dir.path(), "new.txt", "fresh\n").unwrap();
        assert_eq!(result.merged_content, "fresh\n");
        assert!(!result.had_conflict);
        assert_eq!(result.state, FileState::Clean);
    }

    #[test]
    fn test_clean_tracked_emits_candidate() {
        let (dir, store) = setup();
        store.track("a.txt").unwrap();
        store.set_snapshot("a.txt", "v1\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "v1\n").unwrap();

        let result = Reconciler::reconcile(&store, dir.path(), "a.txt", "v2\n").unwrap();
        assert_eq!(result.merged_content, "v2\n");
        assert_eq!(result.state, FileState::Clean);
    }

    #[test]
    fn test_edited_merges_and_stays_edited() {
        let (dir, store) = setup();
        store.track("a.txt").unwrap();
        store.set_snapshot("a.txt", "A\nB\nC\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "A\nB\nC\nD (manual)\n").unwrap();

        let result =
            Reconciler::reconcile(&store, dir.path(), "a.txt", "A\nB\nC-changed\n").unwrap();
        assert!(!result.had_conflict);
        assert_eq!(result.state, FileState::Edited);
        assert!(result.merged_content.contains("C-changed"));
        assert!(result.merged_content.contains("D (manual)"));
        assert!(result.warning.is_none());
    }

    #[test]
    fn test_conflict_moves_to_conflicted_with_warning() {
        let (dir, store) = setup();
        store.track("a.txt").unwrap();
        store.set_snapshot("a.txt", "A\nB\nC\n").unwrap();
        std::fs::write(dir.path().join("a.txt"), "A\nB-edited\nC\n").unwrap();

        let result =
            Reconciler::reconcile(&store, dir.path(), "a.txt", "A\nB-newgen\nC\n").unwrap();
        assert!(result.had_conflict);
        assert_eq!(result.state, FileState::Conflicted);
        assert!(result.warning.is_some());
        assert!(result.merged_content.contains("<<<<<<< generated"));
        assert!(!result.conflict_regions.is_empty());
    }

    #[test]
    fn test_missing_snapshot_preserves_working_copy() {
        let (dir, store) = setup();
        store.track("a.txt").unwrap();
        std::fs::write(dir.path().join("a.txt"), "precious manual content\n").unwrap();

        let result = Reconciler::reconcile(&store, dir.path(), "a.txt", "candidate\n").unwrap();
        assert!(!result.had_conflict);
        assert_eq!(result.merged_content, "precious manual content\n");
        assert_eq!(result.state, FileState::Edited);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FileState::Untracked.to_string(), "untracked");
        assert_eq!(FileState::Clean.to_string(), "clean");
        assert_eq!(FileState::Edited.to_string(), "edited");
        assert_eq!(FileState::Conflicted.to_string(), "conflicted");
    }
}
