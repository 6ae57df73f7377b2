//! Generation pipeline driver.
//!
//! The driver consumes emitter output (a map of relative path to candidate
//! text) and, for each file: evaluates the reconcile policy, invokes the
//! reconciler, writes the result, resets the snapshot to the *raw* candidate
//! (never the merged text), and tracks the path. Per-file reconciliations
//! are independent, so they run on a bounded worker pool; a failure on one
//! file never aborts the batch.
//!
//! A cancellation flag is checked between files: an interrupted run leaves a
//! fully-written, consistent file set rather than a half-written one. A lock
//! prevents concurrent runs on the same driver, released via a drop guard so
//! it survives panics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::errors::{PipelineError, StoreError};
use crate::models::{FileOutcome, FileReport, RunReport};
use crate::policy::{PolicyDecision, ReconcilePolicy};
use crate::reconciler::{FileState, Reconciler};
use crate::store::ContentStore;

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Drives one output root through generation runs.
pub struct PipelineDriver {
    output_root: PathBuf,
    store: Arc<ContentStore>,
    policy: ReconcilePolicy,
    concurrency: usize,
    cancel: Arc<AtomicBool>,
    /// Atomic flag preventing concurrent runs.
    running: Arc<AtomicBool>,
}

impl PipelineDriver {
    /// Create a driver for `output_root` with the given configuration.
    pub fn new<P: AsRef<Path>>(output_root: P, config: &EngineConfig) -> Self {
        let output_root = output_root.as_ref().to_path_buf();
        info!(root = %output_root.display(), "initializing pipeline driver");
        Self {
            store: Arc::new(ContentStore::open(&output_root)),
            policy: ReconcilePolicy::from(&config.reconcile),
            concurrency: config.reconcile.concurrency.max(1),
            cancel: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            output_root,
        }
    }

    /// The content store backing this driver.
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Flag that, once set, stops the run before the next file.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Explicitly stop managing `rel_path`. The working file stays on disk
    /// and will be fully overwritten by future runs.
    pub fn untrack(&self, rel_path: &str) -> Result<(), StoreError> {
        self.store.untrack(rel_path)
    }

    /// Execute one generation run over the emitter output.
    ///
    /// Returns a [`RunReport`]; per-file failures are recorded in it, never
    /// raised. The only errors are run-level: an overlapping run or a dead
    /// worker pool.
    pub async fn run(&self, files: BTreeMap<String, String>) -> Result<RunReport, PipelineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning);
        }
        let _guard = RunLockGuard(Arc::clone(&self.running));

        let mut report = RunReport::new();
        info!(
            run_id = %report.run_id,
            files = files.len(),
            concurrency = self.concurrency,
            "starting generation run"
        );

        report.stale_paths = self
            .store
            .tracked_paths()
            .into_iter()
            .filter(|path| !files.contains_key(path))
            .collect();
        if !report.stale_paths.is_empty() {
            debug!(count = report.stale_paths.len(), "stale tracked paths detected");
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for (path, candidate) in files {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(path = path.as_str(), "cancellation requested, stopping before next file");
                report.cancelled = true;
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Worker(e.to_string()))?;
            let store = Arc::clone(&self.store);
            let output_root = self.output_root.clone();
            let policy = self.policy.clone();

            workers.spawn_blocking(move || {
                let _permit = permit;
                process_file(&store, &output_root, &policy, &path, &candidate)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(file_report) => report.files.push(file_report),
                Err(e) => error!(error = %e, "reconciliation worker panicked"),
            }
        }

        report.files.sort_by(|a, b| a.path.cmp(&b.path));
        for file in &report.files {
            report.counts.record(&file.outcome);
            if file.outcome == FileOutcome::SkippedError {
                report.failed_paths.push(file.path.clone());
            }
        }
        report.completed_at = Some(Utc::now());

        info!(
            run_id = %report.run_id,
            written_clean = report.counts.written_clean,
            written_merged = report.counts.written_merged,
            conflicts = report.counts.written_with_conflict,
            errors = report.counts.skipped_error,
            cancelled = report.cancelled,
            "generation run finished"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Per-file processing
// ---------------------------------------------------------------------------

/// Process a single emitted file. Infallible by contract: every failure is
/// folded into the returned report entry.
fn process_file(
    store: &ContentStore,
    output_root: &Path,
    policy: &ReconcilePolicy,
    rel_path: &str,
    candidate: &str,
) -> FileReport {
    match policy.evaluate(rel_path) {
        PolicyDecision::Skip { pattern } => {
            debug!(path = rel_path, pattern = pattern.as_str(), "skipped by policy");
            FileReport {
                path: rel_path.to_string(),
                outcome: FileOutcome::SkippedPolicy,
                warning: None,
                error: None,
                conflict_regions: Vec::new(),
            }
        }
        PolicyDecision::Overwrite { pattern } => {
            debug!(path = rel_path, pattern = pattern.as_str(), "overwritten by policy");
            match write_file(output_root, rel_path, candidate) {
                Ok(()) => FileReport {
                    path: rel_path.to_string(),
                    outcome: FileOutcome::WrittenClean,
                    warning: None,
                    error: None,
                    conflict_regions: Vec::new(),
                },
                Err(e) => error_report(rel_path, &PipelineError::Io(e)),
            }
        }
        PolicyDecision::Reconcile => match reconcile_file(store, output_root, rel_path, candidate)
        {
            Ok(file_report) => file_report,
            Err(e) => {
                error!(path = rel_path, error = %e, "failed to reconcile file, continuing");
                error_report(rel_path, &e)
            }
        },
    }
}

/// The full per-file sequence: reconcile, write, snapshot, track.
fn reconcile_file(
    store: &ContentStore,
    output_root: &Path,
    rel_path: &str,
    candidate: &str,
) -> Result<FileReport, PipelineError> {
    let result = Reconciler::reconcile(store, output_root, rel_path, candidate)?;

    write_file(output_root, rel_path, &result.merged_content)?;
    // Always the generator's raw output — the merged text must never become
    // the next merge ancestor.
    store.set_snapshot(rel_path, candidate)?;
    store.track(rel_path)?;

    let outcome = match result.state {
        FileState::Untracked | FileState::Clean => FileOutcome::WrittenClean,
        FileState::Edited => FileOutcome::WrittenMerged,
        FileState::Conflicted => FileOutcome::WrittenWithConflict,
    };
    if let Some(warning) = &result.warning {
        warn!(path = rel_path, "{}", warning);
    }

    Ok(FileReport {
        path: rel_path.to_string(),
        outcome,
        warning: result.warning,
        error: None,
        conflict_regions: result.conflict_regions,
    })
}

fn write_file(output_root: &Path, rel_path: &str, content: &str) -> std::io::Result<()> {
    let dest = output_root.join(rel_path);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, content)
}

fn error_report(rel_path: &str, error: &PipelineError) -> FileReport {
    FileReport {
        path: rel_path.to_string(),
        outcome: FileOutcome::SkippedError,
        warning: None,
        error: Some(error.to_string()),
        conflict_regions: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Run lock RAII guard
// ---------------------------------------------------------------------------

/// Drop guard that resets the `running` flag to `false`, even on panic.
struct RunLockGuard(Arc<AtomicBool>);

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(root: &Path) -> PipelineDriver {
        PipelineDriver::new(root, &EngineConfig::default())
    }

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_first_run_writes_and_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());

        let report = driver
            .run(files(&[("src/client.txt", "v1\n"), ("nested/deep/mod.txt", "m1\n")]))
            .await
            .unwrap();

        assert_eq!(report.counts.written_clean, 2);
        assert!(report.is_clean());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/client.txt")).unwrap(),
            "v1\n"
        );
        assert!(driver.store().is_tracked("src/client.txt"));
        assert!(driver.store().is_tracked("nested/deep/mod.txt"));
    }

    #[tokio::test]
    async fn test_snapshot_is_raw_candidate_not_merged_text() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());

        driver.run(files(&[("a.txt", "A\nB\nC\n")])).await.unwrap();
        // Manual append.
        std::fs::write(dir.path().join("a.txt"), "A\nB\nC\nD (manual)\n").unwrap();

        let report = driver.run(files(&[("a.txt", "A\nB\nC-changed\n")])).await.unwrap();
        assert_eq!(report.counts.written_merged, 1);

        let on_disk = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert!(on_disk.contains("C-changed"));
        assert!(on_disk.contains("D (manual)"));
        // The snapshot is the unmerged candidate.
        assert_eq!(
            driver.store().snapshot("a.txt"),
            Some("A\nB\nC-changed\n".to_string())
        );
    }

    #[tokio::test]
    async fn test_per_file_error_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        // Occupy "blocked.txt" with a directory so the write fails.
        std::fs::create_dir_all(dir.path().join("blocked.txt")).unwrap();
        let driver = driver(dir.path());

        let report = driver
            .run(files(&[("blocked.txt", "x\n"), ("fine.txt", "y\n")]))
            .await
            .unwrap();

        assert_eq!(report.counts.skipped_error, 1);
        assert_eq!(report.counts.written_clean, 1);
        assert_eq!(report.failed_paths, vec!["blocked.txt".to_string()]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("fine.txt")).unwrap(),
            "y\n"
        );
    }

    #[tokio::test]
    async fn test_policy_skip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.reconcile.ignore_patterns = vec!["keep/**".into()];
        config.reconcile.overwrite_patterns = vec!["*.lock".into()];
        let driver = PipelineDriver::new(dir.path(), &config);

        let report = driver
            .run(files(&[("keep/mine.txt", "generated\n"), ("deps.lock", "lock v1\n")]))
            .await
            .unwrap();

        assert_eq!(report.counts.skipped_policy, 1);
        assert_eq!(report.counts.written_clean, 1);
        assert!(!dir.path().join("keep/mine.txt").exists());
        assert!(dir.path().join("deps.lock").exists());
        // Overwritten paths stay untracked; reconciliation is opt-in.
        assert!(!driver.store().is_tracked("deps.lock"));
        assert!(!driver.store().is_tracked("keep/mine.txt"));
    }

    #[tokio::test]
    async fn test_stale_paths_reported_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());

        driver.run(files(&[("old.txt", "v1\n"), ("kept.txt", "k1\n")])).await.unwrap();
        let report = driver.run(files(&[("kept.txt", "k2\n")])).await.unwrap();

        assert_eq!(report.stale_paths, vec!["old.txt".to_string()]);
        assert!(dir.path().join("old.txt").exists());
        assert!(driver.store().is_tracked("old.txt"));
    }

    #[tokio::test]
    async fn test_untrack_makes_path_overwrite_again() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());

        driver.run(files(&[("a.txt", "v1\n")])).await.unwrap();
        std::fs::write(dir.path().join("a.txt"), "manual edit\n").unwrap();
        driver.untrack("a.txt").unwrap();

        let report = driver.run(files(&[("a.txt", "v2\n")])).await.unwrap();
        assert_eq!(report.counts.written_clean, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "v2\n"
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_processing() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver(dir.path());
        driver.cancel_flag().store(true, Ordering::SeqCst);

        let report = driver.run(files(&[("a.txt", "v1\n")])).await.unwrap();
        assert!(report.cancelled);
        assert!(report.files.is_empty());
        assert!(!dir.path().join("a.txt").exists());
    }
}
