//! Manual-edit detection.
//!
//! Given the content store and the on-disk working tree, the classifier
//! decides whether a file has been manually edited since the last
//! generation. The comparison is byte-for-byte against the recorded
//! snapshot, deliberately non-normalized, so a formatting-only regeneration
//! is never misclassified as an edit. This exact check is what gates the
//! expensive structural differencer.

use std::path::Path;

use tracing::debug;

use crate::store::ContentStore;

/// Classification of a tracked file's working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditState {
    /// Working copy matches the snapshot (or is absent / untracked).
    Unmodified,
    /// Working copy differs byte-for-byte from the snapshot.
    Edited,
    /// Working copy exists but no trustworthy snapshot is recorded —
    /// there is nothing to safely compare against.
    EditedMissingBase,
}

/// Stateless classifier over the store and the working tree.
pub struct ChangeClassifier;

impl ChangeClassifier {
    /// Classify the working copy of `rel_path` under `output_root`.
    pub fn classify(store: &ContentStore, output_root: &Path, rel_path: &str) -> EditState {
        if !store.is_tracked(rel_path) {
            return EditState::Unmodified;
        }

        let working = match std::fs::read(output_root.join(rel_path)) {
            Ok(bytes) => bytes,
            // Absent (or unreadable) working copy: nothing the user could
            // have edited, regenerate freely.
            Err(_) => return EditState::Unmodified,
        };

        let snapshot = match store.snapshot(rel_path) {
            Some(text) => text,
            None => {
                debug!(path = rel_path, "tracked path has no snapshot");
                return EditState::EditedMissingBase;
            }
        };

        if working == snapshot.as_bytes() {
            EditState::Unmodified
        } else {
            debug!(path = rel_path, "manual edit detected");
            EditState::Edited
        }
    }

    /// Whether `rel_path` carries a manual edit.
    pub fn has_manual_edit(store: &ContentStore, output_root: &Path, rel_path: &str) -> bool {
        !matches!(
            Self::classify(store, output_root, rel_path),
            EditState::Unmodified
        )
    }
}
