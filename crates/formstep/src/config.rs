//! Step configuration.
//!
//! Configuration is an ordered list of step descriptors plus a few policy
//! switches. It can be built in code or loaded from TOML or JSON:
//!
//! ```toml
//! goto_bounds = "inclusive"
//! stale_validation = "discard"
//! deferred_visibility = true
//!
//! [[steps]]
//! name = "account"
//! title = "Account"
//!
//! [[steps]]
//! name = "profile"
//! title = "Profile"
//! ```

use std::path::Path;

use formstep_core::logging::targets;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::step::{Step, StepSequence};

/// Which indices a `Goto` command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GotoBounds {
    /// Accept `0..=N`, one past the last step included.
    ///
    /// Existing hosts can rely on jumping "past" the last step, which hides
    /// every step field.
    #[default]
    Inclusive,
    /// Accept `0..N`, valid step indices only.
    Strict,
}

impl GotoBounds {
    /// Whether `target` is accepted for a sequence of `len` steps.
    pub fn accepts(self, target: i64, len: usize) -> bool {
        let Ok(target) = usize::try_from(target) else {
            return false;
        };
        match self {
            Self::Inclusive => target <= len,
            Self::Strict => target < len,
        }
    }
}

/// What to do with a validation result that resolves after the current step
/// has already changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleValidationPolicy {
    /// Drop the result; the step that was validated is no longer current.
    #[default]
    Discard,
    /// Advance relative to whatever step is current when the result arrives.
    Apply,
}

fn default_deferred() -> bool {
    true
}

/// Configuration for a [`StepController`](crate::StepController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsConfig {
    /// Steps in display order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Accepted `Goto` range.
    #[serde(default)]
    pub goto_bounds: GotoBounds,
    /// Handling of late validation results.
    #[serde(default)]
    pub stale_validation: StaleValidationPolicy,
    /// Run field visibility writes on the next scheduling turn instead of
    /// immediately.
    #[serde(default = "default_deferred")]
    pub deferred_visibility: bool,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            goto_bounds: GotoBounds::default(),
            stale_validation: StaleValidationPolicy::default(),
            deferred_visibility: default_deferred(),
        }
    }
}

impl StepsConfig {
    /// Create a configuration with the given steps and default policies.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Create a configuration with one step per field name.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(Step::new))
    }

    /// Set the goto bounds using builder pattern.
    pub fn with_goto_bounds(mut self, bounds: GotoBounds) -> Self {
        self.goto_bounds = bounds;
        self
    }

    /// Set the stale validation policy using builder pattern.
    pub fn with_stale_validation(mut self, policy: StaleValidationPolicy) -> Self {
        self.stale_validation = policy;
        self
    }

    /// Choose deferred or immediate visibility writes using builder pattern.
    pub fn with_deferred_visibility(mut self, deferred: bool) -> Self {
        self.deferred_visibility = deferred;
        self
    }

    /// Parse TOML configuration.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Parse JSON configuration.
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Load configuration from a `.toml` or `.json` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let config = match extension.as_str() {
            "toml" => Self::from_toml_str(&source)?,
            "json" => Self::from_json_str(&source)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        tracing::debug!(
            target: targets::CONFIG,
            path = %path.display(),
            steps = config.steps.len(),
            "loaded step configuration"
        );
        Ok(config)
    }

    /// Build the step sequence.
    pub fn sequence(&self) -> StepSequence {
        StepSequence::new(self.steps.iter().cloned())
    }
}
