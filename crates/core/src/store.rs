//! Content store: the tracked-file registry and generation snapshots.
//!
//! Persists, per relative path, the exact text emitted by the last
//! successful run (the merge ancestor) and the set of paths under
//! reconciliation. State lives inside the output root:
//!
//! - `tracked-files.json` — the path registry, written atomically via a
//!   temp-file-and-rename so concurrent workers never observe a partial
//!   write.
//! - `cache/<encoded>` — one raw-text snapshot blob per path, where
//!   `<encoded>` is a base64 URL-safe (unpadded) encoding of the relative
//!   path: reversible, filesystem-safe, and free of `/`, `+`, and `=`.
//!
//! A missing or corrupt registry fails open to "nothing tracked": the next
//! run regenerates everything rather than risking data loss from trusting
//! bad state. Snapshot reads degrade the same way: a blob that is missing or
//! fails its digest check is reported as absent.
//!
//! The store is `Send + Sync` (interior mutex) and scoped to one generation
//! invocation.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::StoreError;

/// Registry file name, relative to the output root.
pub const REGISTRY_FILE: &str = "tracked-files.json";

/// Snapshot blob directory name, relative to the output root.
pub const CACHE_DIR: &str = "cache";

// ---------------------------------------------------------------------------
// Registry serialization
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    files: Vec<RegistryEntry>,
}

/// One registry entry.
///
/// Older registries stored a bare path string; newer ones carry the snapshot
/// digest alongside. Both load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RegistryEntry {
    Plain(String),
    WithDigest {
        path: String,
        #[serde(default)]
        digest: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    tracked: BTreeSet<String>,
    digests: BTreeMap<String, String>,
}

/// Handle to the persistent reconciliation state of one output root.
pub struct ContentStore {
    output_root: PathBuf,
    state: Mutex<StoreState>,
}

impl ContentStore {
    /// Open the store for an output root, loading the registry if present.
    ///
    /// Never fails: a missing registry starts fresh, a corrupt one fails
    /// open to "nothing tracked" with a loud warning.
    pub fn open<P: AsRef<Path>>(output_root: P) -> Self {
        let output_root = output_root.as_ref().to_path_buf();
        let state = load_registry(&output_root);
        info!(
            root = %output_root.display(),
            tracked = state.tracked.len(),
            "content store opened"
        );
        Self {
            output_root,
            state: Mutex::new(state),
        }
    }

    /// The output root this store manages.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Whether `rel_path` is under reconciliation management.
    pub fn is_tracked(&self, rel_path: &str) -> bool {
        self.state().tracked.contains(rel_path)
    }

    /// All tracked paths, sorted.
    pub fn tracked_paths(&self) -> Vec<String> {
        self.state().tracked.iter().cloned().collect()
    }

    /// Put `rel_path` under management and persist the registry.
    pub fn track(&self, rel_path: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.tracked.insert(rel_path.to_string()) {
            return Ok(());
        }
        debug!(path = rel_path, "tracking path");
        self.persist_registry(&state)
    }

    /// Remove `rel_path` from management, delete its snapshot blob, and
    /// persist the registry.
    pub fn untrack(&self, rel_path: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.tracked.remove(rel_path) {
            return Ok(());
        }
        state.digests.remove(rel_path);
        debug!(path = rel_path, "untracking path");

        let blob = self.blob_path(rel_path);
        if let Err(e) = std::fs::remove_file(&blob) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = rel_path, error = %e, "failed to remove snapshot blob");
            }
        }
        self.persist_registry(&state)
    }

    /// The last-generated content for `rel_path`, if a trustworthy snapshot
    /// exists.
    ///
    /// Returns `None` when the blob is missing, unreadable, or fails its
    /// digest check; callers degrade per the missing-snapshot policy.
    pub fn snapshot(&self, rel_path: &str) -> Option<String> {
        let blob = self.blob_path(rel_path);
        let text = match std::fs::read_to_string(&blob) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = rel_path, error = %e, "failed to read snapshot blob");
                return None;
            }
        };

        if let Some(expected) = self.state().digests.get(rel_path) {
            let actual = content_digest(&text);
            if &actual != expected {
                warn!(path = rel_path, "snapshot blob failed digest check, treating as absent");
                return None;
            }
        }
        Some(text)
    }

    /// Record `text` as the snapshot for `rel_path`.
    ///
    /// The blob is written atomically; if the path is tracked, the registry
    /// is re-persisted with the fresh digest.
    pub fn set_snapshot(&self, rel_path: &str, text: &str) -> Result<(), StoreError> {
        let cache_dir = self.output_root.join(CACHE_DIR);
        std::fs::create_dir_all(&cache_dir)?;

        let blob = self.blob_path(rel_path);
        write_atomic(&cache_dir, &blob, text.as_bytes())?;

        let mut state = self.state();
        state
            .digests
            .insert(rel_path.to_string(), content_digest(text));
        if state.tracked.contains(rel_path) {
            self.persist_registry(&state)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Path encoding
    // -----------------------------------------------------------------------

    /// Encode a relative path into a flat, filesystem-safe cache file name.
    ///
    /// The encoding is reversible and its alphabet contains no `/`, `+`,
    /// or `=`.
    pub fn encode_path(rel_path: &str) -> String {
        URL_SAFE_NO_PAD.encode(rel_path.as_bytes())
    }

    /// Decode a cache file name back into the relative path it stands for.
    pub fn decode_path(encoded: &str) -> Result<String, StoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| StoreError::PathDecode {
                encoded: encoded.to_string(),
            })?;
        String::from_utf8(bytes).map_err(|_| StoreError::PathDecode {
            encoded: encoded.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("content store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn blob_path(&self, rel_path: &str) -> PathBuf {
        self.output_root
            .join(CACHE_DIR)
            .join(Self::encode_path(rel_path))
    }

    fn persist_registry(&self, state: &StoreState) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.output_root)?;

        let files: Vec<RegistryEntry> = state
            .tracked
            .iter()
            .map(|path| RegistryEntry::WithDigest {
                path: path.clone(),
                digest: state.digests.get(path).cloned(),
            })
            .collect();
        let raw = serde_json::to_string_pretty(&RegistryFile { files })
            .map_err(|e| StoreError::RegistrySerialize(e.to_string()))?;

        write_atomic(
            &self.output_root,
            &self.output_root.join(REGISTRY_FILE),
            raw.as_bytes(),
        )
    }
}

/// Write `bytes` to `dest` via a temp file in `dir` plus an atomic rename.
fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Hex-encoded SHA-256 of snapshot text.
fn content_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Load the registry from disk, failing open on any problem.
fn load_registry(output_root: &Path) -> StoreState {
    let path = output_root.join(REGISTRY_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(root = %output_root.display(), "no tracking registry, starting fresh");
            return StoreState::default();
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "tracking registry unreadable, failing open to nothing tracked"
            );
            return StoreState::default();
        }
    };

    let parsed: RegistryFile = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "tracking registry corrupt, failing open to nothing tracked"
            );
            return StoreState::default();
        }
    };

    let mut state = StoreState::default();
    for entry in parsed.files {
        match entry {
            RegistryEntry::Plain(path) => {
                state.tracked.insert(path);
            }
            RegistryEntry::WithDigest { path, digest } => {
                if let Some(digest) = digest {
                    state.digests.insert(path.clone(), digest);
                }
                state.tracked.insert(path);
            }
        }
    }
    state
}
