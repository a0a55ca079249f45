//! Error Types
//!
//! A single error enum covers every fatal failure of a workflow run.
//! Recoverable conditions (interpolation, snapshot writes, replay lookups)
//! are handled where they occur and never surface through this type.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that abort a workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A named step could not be mapped to any executable.
    #[error("Step directory or file not found: {path}")]
    Resolution { step: String, path: String },

    /// An executable's own `execute()` failed.
    #[error("Step '{step}' failed: {message}")]
    Execution { step: String, message: String },

    /// A `$(...)` command could not be run.
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// The language-model collaborator returned an error.
    #[error("Model request failed: {0}")]
    Model(String),

    /// The declared step list contains an unsupported shape.
    #[error("Unknown step type: {0}")]
    InvalidStep(String),

    /// The workflow definition failed validation.
    #[error("Invalid workflow configuration: {0}")]
    Validation(String),

    /// A `timestamp:step` replay argument has a malformed timestamp.
    #[error("Invalid timestamp format: '{0}'. Expected YYYYMMDD_HHMMSS_LLL")]
    InvalidReplayTimestamp(String),

    /// A scoped replay found no snapshot preceding the requested step.
    #[error("No saved state before step '{step}' in session {timestamp}")]
    ReplayNotFound { step: String, timestamp: String },

    /// A parallel branch panicked instead of returning.
    #[error("Parallel branch panicked while running '{0}'")]
    BranchPanicked(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Short tag identifying the error category in step events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::Execution { .. } => "execution",
            Self::Command { .. } => "command",
            Self::Model(_) => "model",
            Self::InvalidStep(_) => "invalid_step",
            Self::Validation(_) => "validation",
            Self::InvalidReplayTimestamp(_) => "invalid_replay_timestamp",
            Self::ReplayNotFound { .. } => "replay_not_found",
            Self::BranchPanicked(_) => "branch_panicked",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
            Self::Json(_) => "json",
        }
    }

    pub(crate) fn execution(step: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            step: step.to_string(),
            message: message.into(),
        }
    }
}
