//! TOML-based configuration for the generation engine.
//!
//! The engine itself has few knobs: how wide the reconciliation worker pool
//! is, and which paths the reconcile policy excludes or force-overwrites.
//! Everything else (emitter selection, schema source, naming style) belongs
//! to the surrounding pipeline and never reaches this crate.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reconciliation behaviour settings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Size of the bounded worker pool (default 4, 1 = sequential).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Glob patterns for paths the pipeline must not touch at all.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Glob patterns for paths that are always overwritten with the fresh
    /// candidate, bypassing reconciliation (and tracking).
    #[serde(default)]
    pub overwrite_patterns: Vec<String>,
}

fn default_concurrency() -> usize {
    4
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            ignore_patterns: Vec::new(),
            overwrite_patterns: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        info!(path = %path.display(), "loading engine configuration");
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        debug!(
            concurrency = config.reconcile.concurrency,
            ignore_patterns = config.reconcile.ignore_patterns.len(),
            overwrite_patterns = config.reconcile.overwrite_patterns.len(),
            "engine configuration loaded"
        );
        Ok(config)
    }

    /// Validate field values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconcile.concurrency".into(),
                detail: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
