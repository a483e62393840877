//! Error taxonomy for the release pipeline.
//!
//! Command, timeout, packaging and toolchain errors are converted into failed
//! step outcomes at the step boundary. [`ReleaseError::Configuration`] is the
//! exception: it marks a caller mistake and aborts the run where it is raised.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Convenience alias for library results.
pub type Result<T, E = ReleaseError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Every acquisition candidate for a required tool was exhausted.
    #[error("tool '{tool}' is unavailable; tried:\n{}", format_attempts(.attempts))]
    ToolUnavailable { tool: String, attempts: Vec<String> },

    /// An external process returned nonzero or could not be launched.
    #[error("command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    /// A process exceeded its allotted duration and was terminated.
    #[error("command `{command}` timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    /// Staging, writing or hashing an artifact failed.
    #[error("packaging failed for '{}': {detail}", .path.display())]
    PackagingIo { path: PathBuf, detail: String },

    /// Contradictory or incomplete options supplied by the caller.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ReleaseError {
    pub fn packaging(path: &Path, detail: impl std::fmt::Display) -> Self {
        ReleaseError::PackagingIo {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        ReleaseError::Configuration(detail.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ReleaseError::Configuration(_))
    }
}

fn format_attempts(attempts: &[String]) -> String {
    if attempts.is_empty() {
        return "  (no candidates declared)".to_string();
    }
    attempts
        .iter()
        .enumerate()
        .map(|(i, a)| format!("  {}. {}", i + 1, a))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find a configuration error anywhere in an `anyhow` chain.
pub fn configuration_error(err: &anyhow::Error) -> Option<&ReleaseError> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ReleaseError>())
        .find(|e| e.is_configuration())
}
