//! TOML-based configuration for nbmerge.
//!
//! The configuration is an explicit value handed to the aligner and the
//! auto-resolution engine at call time; nothing in the core reads ambient
//! settings.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MergeConfig {
    /// Auto-resolution policy.
    #[serde(default)]
    pub auto_resolve: AutoResolveSettings,

    /// Cell alignment tuning.
    #[serde(default)]
    pub alignment: AlignmentConfig,
}

// ---------------------------------------------------------------------------
// Auto-resolution
// ---------------------------------------------------------------------------

/// Which classes of semantic conflict may be resolved without asking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoResolveSettings {
    /// Null the execution counter of conflicting cells instead of asking.
    #[serde(default = "default_true")]
    pub auto_resolve_execution_count: bool,

    /// Keep the resolved side's kernel metadata when the two branches disagree.
    #[serde(default = "default_true")]
    pub auto_resolve_kernel_version: bool,

    /// Clear outputs of output-only conflicts and of every residual conflict.
    #[serde(default)]
    pub strip_outputs: bool,

    /// Treat source edits that differ only in trailing whitespace as resolved.
    #[serde(default)]
    pub auto_resolve_whitespace: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AutoResolveSettings {
    fn default() -> Self {
        Self {
            auto_resolve_execution_count: true,
            auto_resolve_kernel_version: true,
            strip_outputs: false,
            auto_resolve_whitespace: false,
        }
    }
}

impl AutoResolveSettings {
    /// Settings with every auto-resolution disabled.
    pub fn disabled() -> Self {
        Self {
            auto_resolve_execution_count: false,
            auto_resolve_kernel_version: false,
            strip_outputs: false,
            auto_resolve_whitespace: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

/// Cell aligner tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignmentConfig {
    /// Minimum token similarity (0.0-1.0) for two non-identical cells to be
    /// considered the same logical cell. Default 0.6.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_similarity_threshold() -> f64 {
    0.6
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl MergeConfig {
    /// Load a [`MergeConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate that all values are within range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.alignment.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
            return Err(ConfigError::InvalidValue {
                field: "alignment.similarity_threshold".into(),
                detail: format!("must be within [0, 1], got {threshold}"),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
