//! Loop configuration and budget constants.
//!
//! All limits that bound the build loop live here: the iteration budget,
//! the per-file failure thresholds, and the coverage floor. A
//! [`LoopConfig`] can be loaded from `packsmith.toml` in the project
//! directory; every field has a default matching the constants below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PacksmithError, Result};

/// Maximum turns the loop will execute before giving up.
pub const MAX_LOOP_ITERATIONS: u32 = 40;

/// Minimum acceptable unit-test coverage, in percent.
pub const MIN_TEST_COVERAGE: f64 = 90.0;

/// Consecutive same-error failures on one file before a meta-correction
/// is issued.
pub const MAX_FILE_MODIFICATIONS_BEFORE_META: u32 = 3;

/// Attempts allowed after a meta-correction before the loop terminates
/// on that file.
pub const MAX_META_CORRECTION_ATTEMPTS: u32 = 2;

/// Informational only: lint failures are tracked by the generic per-file
/// tracker, not a dedicated counter.
pub const MAX_LINT_FIX_ATTEMPTS: u32 = 3;

/// Default config file name looked up in the project directory.
pub const CONFIG_FILE: &str = "packsmith.toml";

fn default_max_iterations() -> u32 {
    MAX_LOOP_ITERATIONS
}

fn default_min_coverage() -> f64 {
    MIN_TEST_COVERAGE
}

fn default_modifications_before_meta() -> u32 {
    MAX_FILE_MODIFICATIONS_BEFORE_META
}

fn default_meta_correction_attempts() -> u32 {
    MAX_META_CORRECTION_ATTEMPTS
}

/// Configuration for a single loop execution.
///
/// # Example
///
/// ```
/// use packsmith::config::LoopConfig;
///
/// let config = LoopConfig::default();
/// assert_eq!(config.max_iterations, 40);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopConfig {
    /// Maximum turns before the loop exits with an exhaustion error.
    #[serde(default = "default_max_iterations", rename = "maxIterations")]
    pub max_iterations: u32,

    /// Coverage floor for the unit-test soft-failure rule, in percent.
    #[serde(default = "default_min_coverage", rename = "minTestCoverage")]
    pub min_test_coverage: f64,

    /// Same-error failures on one file before escalating.
    #[serde(
        default = "default_modifications_before_meta",
        rename = "modificationsBeforeMeta"
    )]
    pub modifications_before_meta: u32,

    /// Post-escalation attempts before terminating on a file.
    #[serde(
        default = "default_meta_correction_attempts",
        rename = "metaCorrectionAttempts"
    )]
    pub meta_correction_attempts: u32,

    /// How long to wait for a human response after a file exhausts its
    /// meta-correction budget. `None` terminates immediately.
    #[serde(default, rename = "escalationTimeoutSecs")]
    pub escalation_timeout_secs: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_LOOP_ITERATIONS,
            min_test_coverage: MIN_TEST_COVERAGE,
            modifications_before_meta: MAX_FILE_MODIFICATIONS_BEFORE_META,
            meta_correction_attempts: MAX_META_CORRECTION_ATTEMPTS,
            escalation_timeout_secs: None,
        }
    }
}

impl LoopConfig {
    /// Load configuration from `packsmith.toml` in the given project
    /// directory, falling back to defaults when the file is absent.
    pub fn load(project_dir: impl AsRef<Path>) -> Result<Self> {
        let path = project_dir.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_file(&path)
    }

    /// Load configuration from an explicit file path.
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PacksmithError::config_with_path(e.to_string(), path.to_path_buf()))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| PacksmithError::config_with_path(e.to_string(), path.to_path_buf()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PacksmithError::InvalidConfig`] for zero budgets or a
    /// coverage floor outside 0..=100.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(PacksmithError::InvalidConfig {
                field: "maxIterations".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=100.0).contains(&self.min_test_coverage) {
            return Err(PacksmithError::InvalidConfig {
                field: "minTestCoverage".into(),
                reason: format!("{} is not a percentage", self.min_test_coverage),
            });
        }
        if self.modifications_before_meta == 0 {
            return Err(PacksmithError::InvalidConfig {
                field: "modificationsBeforeMeta".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// The escalation timeout as a [`Duration`], if configured.
    #[must_use]
    pub fn escalation_timeout(&self) -> Option<Duration> {
        self.escalation_timeout_secs.map(Duration::from_secs)
    }

    /// Set the escalation timeout.
    #[must_use]
    pub fn with_escalation_timeout(mut self, timeout: Duration) -> Self {
        self.escalation_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Override the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}

/// Default state directory for session files, project-local.
#[must_use]
pub fn default_state_dir(project_dir: impl AsRef<Path>) -> PathBuf {
    project_dir.as_ref().join(".packsmith")
}
