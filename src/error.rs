//! Custom error types for loopguard.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the supervisor.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for loopguard operations
#[derive(Error, Debug)]
pub enum LoopguardError {
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

    /// Circuit breaker opened on stagnation
    #[error(
        "Stagnation halt after {iterations} iterations without progress (threshold: {threshold})"
    )]
    Stagnation { iterations: u32, threshold: u32 },

    /// Circuit breaker opened on a repeated error
    #[error("Repeated-error halt: same failure observed {count} times (signature: {signature})")]
    ErrorLoop { count: u32, signature: String },

    /// Hourly invocation budget exhausted
    #[error("Rate limit reached: {max_calls_per_hour} agent calls in the last hour")]
    RateLimited { max_calls_per_hour: u32 },

    /// Maximum iterations exceeded
    #[error("Maximum iterations ({max}) exceeded without completion")]
    MaxIterations { max: u32 },

    /// Operator cancelled the run
    #[error("Cancelled by operator")]
    Cancelled,

    // =========================================================================
    // Agent Invocation Errors
    // =========================================================================
    /// Agent binary is missing from PATH
    #[error("Agent command not found: {command}")]
    AgentNotFound { command: String },

    /// Agent process failed to spawn or crashed
    #[error("Agent invocation failed: {message}")]
    AgentInvocation { message: String },

    // =========================================================================
    // State Store Errors
    // =========================================================================
    /// Persisted state could not be written
    #[error("State store error for '{record}': {message}")]
    Store { record: String, message: String },

    /// Git status could not be obtained
    #[error("Git operation failed: {operation} - {message}")]
    Git { operation: String, message: String },

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

impl LoopguardError {
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

    /// Create an agent invocation error
    pub fn agent(message: impl Into<String>) -> Self {
        Self::AgentInvocation {
            message: message.into(),
        }
    }

    /// Create a state store error
    pub fn store(record: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            record: record.into(),
            message: message.into(),
        }
    }

    /// Create a git error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable within the loop
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Loop { .. } | Self::AgentInvocation { .. } | Self::Git { .. }
        )
    }

    /// Check if this error is fatal (should abort the loop outright)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Stagnation { .. }
                | Self::ErrorLoop { .. }
                | Self::MaxIterations { .. }
                | Self::AgentNotFound { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Stagnation { .. } => 3,
            Self::ErrorLoop { .. } => 4,
            Self::RateLimited { .. } => 5,
            Self::MaxIterations { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::AgentNotFound { .. } => 8,
            Self::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Type alias for loopguard results
pub type Result<T> = std::result::Result<T, LoopguardError>;
