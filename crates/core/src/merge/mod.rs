//! Structural differencer: family-specific three-way combination logic.
//!
//! Given a base (the last generation snapshot), ours (the possibly-edited
//! working copy) and theirs (the fresh candidate), each family produces a
//! [`MergeOutcome`]. Strategies degrade toward safety: source-code falls back
//! to free-text when parsing fails, structured-data falls back when a
//! document does not parse, and free-text always produces *something*: at
//! worst the candidate with conflict markers around the disputed region.

pub mod data;
pub mod source;
pub mod text;

use serde::{Deserialize, Serialize};

use crate::family::ContentFamily;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Sentinel line opening a conflict region (generated side).
pub const MARKER_BEGIN: &str = "<<<<<<< generated";
/// Sentinel line separating the two sides of a conflict region.
pub const MARKER_SEPARATOR: &str = "=======";
/// Sentinel line closing a conflict region (manual side).
pub const MARKER_END: &str = ">>>>>>> manual";

/// A single conflict-marker block within merged output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictRegion {
    /// Starting line number (1-indexed) of the marker block.
    pub start_line: usize,
    /// Ending line number (1-indexed) of the marker block.
    pub end_line: usize,
}

/// The result of a three-way combination attempt.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The combined content (contains markers when `had_conflict` is set by
    /// the free-text fallback).
    pub content: String,
    /// Whether automatic reconciliation had to surface a conflict.
    pub had_conflict: bool,
    /// Locations of conflict-marker blocks within `content`.
    pub conflict_regions: Vec<ConflictRegion>,
}

impl MergeOutcome {
    /// A clean outcome carrying `content` verbatim.
    pub fn clean(content: String) -> Self {
        Self {
            content,
            had_conflict: false,
            conflict_regions: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Family-dispatching three-way differencer.
pub struct Differencer;

impl Differencer {
    /// Merge `base`, `working` and `candidate` for `rel_path`.
    ///
    /// Trivial cases are resolved here without touching a family strategy:
    /// if either side is unchanged against the base (or both sides changed
    /// identically), the other side wins verbatim. This is also what makes
    /// the missing-snapshot degradation (base == candidate) a no-op.
    pub fn merge(rel_path: &str, base: &str, working: &str, candidate: &str) -> MergeOutcome {
        if working == base || working == candidate {
            return MergeOutcome::clean(candidate.to_string());
        }
        if candidate == base {
            return MergeOutcome::clean(working.to_string());
        }

        match ContentFamily::from_path(rel_path) {
            ContentFamily::SourceCode => source::merge(rel_path, base, working, candidate),
            ContentFamily::StructuredData => data::merge(rel_path, base, working, candidate),
            ContentFamily::FreeText => text::merge(base, working, candidate),
        }
    }
}
