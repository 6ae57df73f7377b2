//! Error types for the sdkgen-core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Most failure modes in this subsystem are deliberately *not* errors: a
//! corrupt registry fails open to "nothing tracked", an unparseable input
//! downgrades to a safer merge family, and a failed patch hunk produces
//! conflict markers. The enums below cover the cases that remain: genuine
//! I/O and configuration problems.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Content store errors
// ---------------------------------------------------------------------------

/// Errors from the snapshot/registry persistence layer.
///
/// Reads degrade rather than error (a missing or corrupt snapshot is treated
/// as absent); these variants surface only from write paths.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Serializing the registry to JSON failed.
    #[error("failed to serialize tracking registry: {0}")]
    RegistrySerialize(String),

    /// An encoded cache file name could not be decoded back to a path.
    #[error("cache entry '{encoded}' is not a valid encoded path")]
    PathDecode { encoded: String },

    /// Generic I/O wrapper (blob writes, registry renames).
    #[error("content store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Reconciler errors
// ---------------------------------------------------------------------------

/// Errors from per-file reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Underlying store error while reading or writing snapshots.
    #[error("reconcile store error: {0}")]
    Store(#[from] StoreError),

    /// Could not read the working copy of a file.
    #[error("failed to read working file '{path}': {source}")]
    WorkingFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Errors from the generation pipeline driver.
///
/// Per-file failures are captured in the run report rather than raised; these
/// variants cover failures of the run itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another generation run is already in progress on this driver.
    #[error("generation run already in progress")]
    AlreadyRunning,

    /// A worker task could not be scheduled or joined.
    #[error("pipeline worker failure: {0}")]
    Worker(String),

    /// Underlying reconciliation error for a single file.
    #[error("pipeline reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Underlying store error during run setup.
    #[error("pipeline store error: {0}")]
    Store(#[from] StoreError),

    /// Generic I/O wrapper.
    #[error("pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = StoreError::PathDecode {
            encoded: "!!bad!!".into(),
        };
        assert_eq!(
            err.to_string(),
            "cache entry '!!bad!!' is not a valid encoded path"
        );

        let err = ConfigError::InvalidValue {
            field: "reconcile.concurrency".into(),
            detail: "must be at least 1".into(),
        };
        assert!(err.to_string().contains("reconcile.concurrency"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let store_err = StoreError::RegistrySerialize("boom".into());
        let core_err: CoreError = store_err.into();
        assert!(matches!(core_err, CoreError::Store(_)));

        let cfg_err = ConfigError::FileNotFound("/tmp/none.toml".into());
        let core_err: CoreError = cfg_err.into();
        assert!(matches!(core_err, CoreError::Config(_)));
    }
}
