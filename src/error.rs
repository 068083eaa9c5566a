//! Custom error types for Packsmith.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the build loop.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Packsmith operations
#[derive(Error, Debug)]
pub enum PacksmithError {
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
    // Loop Execution Errors
    // =========================================================================
    /// Loop execution failed
    #[error("Loop execution error: {message}")]
    Loop { message: String },

    /// Maximum iterations exceeded
    #[error("Maximum iterations ({max}) exceeded without a successful publish")]
    MaxIterations { max: u32 },

    /// A file exhausted its meta-correction budget
    #[error("File {path} is stuck: {attempts} failed attempts with the same error")]
    StuckFile { path: String, attempts: u32 },

    /// Human escalation window elapsed without a response
    #[error("Escalation timed out after {waited_secs}s waiting on {path}")]
    EscalationTimeout { path: String, waited_secs: u64 },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Decision provider failed to produce a command
    #[error("Decision provider error: {message}")]
    Decision { message: String },

    /// A command executor failed at the infrastructure level
    #[error("Executor '{executor}' failed: {message}")]
    Executor { executor: String, message: String },

    /// State persistence failed
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

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

impl PacksmithError {
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

    /// Create a loop error
    pub fn loop_error(message: impl Into<String>) -> Self {
        Self::Loop {
            message: message.into(),
        }
    }

    /// Create a decision provider error
    pub fn decision(message: impl Into<String>) -> Self {
        Self::Decision {
            message: message.into(),
        }
    }

    /// Create an executor error
    pub fn executor(executor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Executor {
            executor: executor.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable by re-entering the same turn
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Loop { .. } | Self::Decision { .. } | Self::Executor { .. }
        )
    }

    /// Check if this error is fatal (should abort the loop)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MaxIterations { .. }
                | Self::StuckFile { .. }
                | Self::EscalationTimeout { .. }
                | Self::MissingTool { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MaxIterations { .. } => 3,
            Self::StuckFile { .. } | Self::EscalationTimeout { .. } => 4,
            Self::MissingTool { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for Packsmith results
pub type Result<T> = std::result::Result<T, PacksmithError>;
