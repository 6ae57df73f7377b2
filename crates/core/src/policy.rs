//! Per-path reconcile policy.
//!
//! Provides [`ReconcilePolicy`], which evaluates each emitted path before the
//! reconciler runs. Reconciliation is opt-in per path; the policy lets an
//! operator carve out paths that should never be generated over (ignore) and
//! paths where manual edits are never worth preserving (overwrite).
//!
//! # Decision model
//!
//! | Condition | Decision |
//! |-----------|----------|
//! | Path matches an ignore pattern | `Skip` |
//! | Path matches an overwrite pattern | `Overwrite` |
//! | Neither | `Reconcile` |
//!
//! Ignore wins over overwrite when both match.

use tracing::debug;

// ---------------------------------------------------------------------------
// Decision enum
// ---------------------------------------------------------------------------

/// The outcome of evaluating a path against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Path goes through the full reconciliation flow.
    Reconcile,
    /// Path is written verbatim from the candidate, untracked.
    Overwrite { pattern: String },
    /// Path is not written at all.
    Skip { pattern: String },
}

impl PolicyDecision {
    /// Short human-readable label for reporting.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reconcile => "reconcile",
            Self::Overwrite { .. } => "overwrite",
            Self::Skip { .. } => "skip",
        }
    }
}

// ---------------------------------------------------------------------------
// ReconcilePolicy
// ---------------------------------------------------------------------------

/// Evaluates emitted paths against ignore and overwrite glob patterns.
///
/// Cheap to clone (owned pattern strings only); shared across workers.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePolicy {
    /// Glob patterns for paths the pipeline must not touch.
    ignore_patterns: Vec<String>,
    /// Glob patterns for paths always overwritten with the candidate.
    overwrite_patterns: Vec<String>,
}

impl ReconcilePolicy {
    /// Create a policy from pattern lists.
    pub fn new(ignore_patterns: Vec<String>, overwrite_patterns: Vec<String>) -> Self {
        Self {
            ignore_patterns,
            overwrite_patterns,
        }
    }

    /// Evaluate a relative path (forward-slash separated).
    pub fn evaluate(&self, rel_path: &str) -> PolicyDecision {
        for pattern in &self.ignore_patterns {
            if matches_pattern(rel_path, pattern) {
                debug!(path = rel_path, pattern = pattern.as_str(), "path matches ignore pattern");
                return PolicyDecision::Skip {
                    pattern: pattern.clone(),
                };
            }
        }

        for pattern in &self.overwrite_patterns {
            if matches_pattern(rel_path, pattern) {
                debug!(
                    path = rel_path,
                    pattern = pattern.as_str(),
                    "path matches overwrite pattern"
                );
                return PolicyDecision::Overwrite {
                    pattern: pattern.clone(),
                };
            }
        }

        PolicyDecision::Reconcile
    }

    /// Whether the policy has any constraints at all.
    pub fn has_constraints(&self) -> bool {
        !self.ignore_patterns.is_empty() || !self.overwrite_patterns.is_empty()
    }
}

impl From<&crate::config::ReconcileConfig> for ReconcilePolicy {
    fn from(cfg: &crate::config::ReconcileConfig) -> Self {
        Self::new(cfg.ignore_patterns.clone(), cfg.overwrite_patterns.clone())
    }
}

/// Test whether `rel_path` matches a glob `pattern`.
///
/// Paths are normalized to forward slashes so patterns behave identically on
/// Windows-produced input.
fn matches_pattern(rel_path: &str, pattern: &str) -> bool {
    let path = rel_path.replace('\\', "/");
    let pat = pattern.replace('\\', "/");
    glob_match::glob_match(&pat, &path)
}
