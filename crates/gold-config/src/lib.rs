// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-config
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Configuration loading, validation, and defaults for Gold ingesters.
//!
//! A deployment runs one or more named ingesters, each pairing an
//! object-storage source with a processor. Invalid settings are fatal:
//! [`validate_config`] refuses them before anything starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration: every ingester this process should run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Named ingesters, keyed by a free-form name ("primary", "tryjob", ...).
    #[serde(default)]
    pub ingesters: BTreeMap<String, IngesterConfig>,
}

/// Settings for one ingester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngesterConfig {
    /// Number of commits-with-data a tile holds before a new tile opens.
    pub tile_width: i64,

    /// How many recent commits the poll window must cover. Zero means the
    /// ingester is tryjob-oriented and polls a fixed duration instead.
    pub n_commits: usize,

    /// Minimum poll window, days component.
    pub min_days: u32,

    /// Minimum poll window, hours component.
    pub min_hours: u32,

    /// Seconds between catch-up polls.
    pub run_every_secs: u64,

    /// Worker tasks running `Process` concurrently.
    pub files_processed_in_parallel: usize,

    /// Capacity of the dispatch channel buffering storage events.
    pub queue_size: usize,

    /// Hard per-file processing timeout, in seconds.
    pub process_timeout_secs: u64,

    /// Record permanently-failed files in the ledger so poison input is not
    /// retried forever.
    pub ledger_permanent_failures: bool,

    /// Where this ingester's files live.
    pub source: SourceConfig,

    /// Code-review systems this ingester accepts, in preference order. The
    /// first is the default when a file does not name its CRS.
    pub code_review_systems: Vec<String>,

    /// Continuous-integration systems this ingester accepts.
    pub continuous_integration_systems: Vec<String>,

    /// Free-form extras (BTProjectID, BTInstance, ...).
    pub extra: BTreeMap<String, String>,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            tile_width: 100,
            n_commits: 0,
            min_days: 0,
            min_hours: 0,
            run_every_secs: 300,
            files_processed_in_parallel: 40,
            queue_size: 500,
            process_timeout_secs: 120,
            ledger_permanent_failures: false,
            source: SourceConfig::default(),
            code_review_systems: Vec::new(),
            continuous_integration_systems: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl IngesterConfig {
    /// The minimum poll window implied by `min_days` and `min_hours`.
    #[must_use]
    pub fn min_window_secs(&self) -> u64 {
        u64::from(self.min_days) * 24 * 3600 + u64::from(self.min_hours) * 3600
    }

    /// Whether the poll window is derived from commit history rather than a
    /// fixed duration.
    #[must_use]
    pub fn is_commit_oriented(&self) -> bool {
        self.n_commits > 0
    }
}

/// An object-storage location: a bucket and a prefix within it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Bucket name.
    pub bucket: String,
    /// Prefix under which this ingester's files are uploaded.
    pub prefix: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse configuration from a TOML string.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] when the string is not valid TOML for
/// the configuration shape.
pub fn parse_toml(input: &str) -> Result<IngestionConfig, ConfigError> {
    toml::from_str(input).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Load and parse configuration from a file.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] when the path does not exist and
/// [`ConfigError::ParseError`] when the contents are not valid TOML.
pub fn load_config(path: &Path) -> Result<IngestionConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    parse_toml(&contents)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check every semantic rule, collecting all failures.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] listing every problem found.
pub fn validate_config(cfg: &IngestionConfig) -> Result<(), ConfigError> {
    let mut reasons = Vec::new();

    if cfg.ingesters.is_empty() {
        reasons.push("at least one ingester must be configured".to_string());
    }
    for (name, ing) in &cfg.ingesters {
        if ing.tile_width < 1 {
            reasons.push(format!("ingester {name:?}: tile_width must be >= 1"));
        }
        if ing.run_every_secs == 0 {
            reasons.push(format!("ingester {name:?}: run_every_secs must be > 0"));
        }
        if ing.files_processed_in_parallel == 0 {
            reasons.push(format!(
                "ingester {name:?}: files_processed_in_parallel must be >= 1"
            ));
        }
        if ing.queue_size == 0 {
            reasons.push(format!("ingester {name:?}: queue_size must be >= 1"));
        }
        if ing.process_timeout_secs == 0 {
            reasons.push(format!("ingester {name:?}: process_timeout_secs must be > 0"));
        }
        if ing.source.bucket.trim().is_empty() {
            reasons.push(format!("ingester {name:?}: source.bucket must not be empty"));
        }
        if !ing.is_commit_oriented() && ing.min_window_secs() == 0 {
            reasons.push(format!(
                "ingester {name:?}: tryjob-oriented ingesters need min_days or min_hours"
            ));
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError { reasons })
    }
}
