//! Error types for the step controller.

use std::path::PathBuf;

use formstep_core::CoreError;
use thiserror::Error;

/// Errors raised by the step controller.
#[derive(Debug, Error)]
pub enum StepError {
    /// A step descriptor has no `name`, so its field cannot be addressed.
    ///
    /// This is a configuration bug in the host, not a user-facing problem.
    #[error("form step at position {index} must include a `name` property")]
    MissingStepName {
        /// Position of the offending step in the sequence.
        index: usize,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A core facility (async runtime, signal) failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Errors raised while loading step configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read step configuration {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error.
    #[error("invalid TOML step configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parse error.
    #[error("invalid JSON step configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The file extension does not name a supported format.
    #[error("unsupported step configuration format: {0}")]
    UnsupportedFormat(String),
}

/// A single field-state write that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldStateError {
    /// The store has no field with this name.
    #[error("unknown field `{0}`")]
    UnknownField(String),

    /// The store refused the write.
    #[error("field `{name}` rejected the state update: {reason}")]
    Rejected {
        /// The field name.
        name: String,
        /// Why the store refused.
        reason: String,
    },
}

/// A specialized Result type for step controller operations.
pub type Result<T> = std::result::Result<T, StepError>;
