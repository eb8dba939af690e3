//! Custom error types for specloop.
//!
//! This module provides structured error types that let the iteration
//! state machine decide whether a failure ends the current iteration,
//! the whole run, or nothing at all.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for specloop operations
#[derive(Error, Debug)]
pub enum LoopError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Spec Errors
    // =========================================================================
    /// The task spec could not be read at all
    #[error("Spec unavailable at {path}: {reason}")]
    SpecUnavailable { path: PathBuf, reason: String },

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// The harness binary could not be located
    #[error("Harness binary not found: {program}")]
    HarnessNotFound { program: String },

    /// The harness process could not be started
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No output arrived within the idle timeout
    #[error("No output from assistant for {secs}s, process killed")]
    IdleTimeout { secs: u64 },

    /// The process exited without emitting a terminal result message
    #[error("Assistant exited without a result message (exit code {exit_code:?})")]
    NoResult { exit_code: Option<i32> },

    /// The process was terminated by a signal
    #[error("Assistant terminated by signal {signal}")]
    Signaled { signal: i32 },

    /// The run was interrupted by the user
    #[error("Interrupted")]
    Cancelled,

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoopError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a spawn error for the given program
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error ends the current iteration.
    ///
    /// Whether it also ends the run is decided by the loop manager's
    /// error policy.
    pub fn is_iteration_fatal(&self) -> bool {
        matches!(
            self,
            Self::HarnessNotFound { .. }
                | Self::Spawn { .. }
                | Self::IdleTimeout { .. }
                | Self::NoResult { .. }
                | Self::Signaled { .. }
                | Self::Io(_)
        )
    }

    /// Check if a fresh iteration could plausibly succeed where this one failed.
    ///
    /// A missing binary or a broken config will fail again the same way.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::IdleTimeout { .. } | Self::NoResult { .. } | Self::Signaled { .. } | Self::Io(_)
        )
    }

    /// Check if this error is a user interrupt
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short machine-readable kind, used in serialised failures
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::HarnessNotFound { .. } | Self::Spawn { .. } => FailureKind::Spawn,
            Self::IdleTimeout { .. } => FailureKind::IdleTimeout,
            Self::NoResult { .. } => FailureKind::NoResult,
            Self::Signaled { .. } => FailureKind::Signaled,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Io(_) => FailureKind::Io,
            _ => FailureKind::Other,
        }
    }
}

/// Serialisable classification of an iteration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Spawn,
    IdleTimeout,
    NoResult,
    Signaled,
    Cancelled,
    Io,
    Other,
}

/// Type alias for specloop results
pub type Result<T> = std::result::Result<T, LoopError>;

/// Extension trait for converting foreign errors to `LoopError`
pub trait IntoLoopError<T> {
    fn into_loop_config(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoLoopError<T> for std::result::Result<T, E> {
    fn into_loop_config(self) -> Result<T> {
        self.map_err(|e| LoopError::config(e.into().to_string()))
    }
}
