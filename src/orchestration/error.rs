//! Error types for orchestrated calls

use crate::provider::MessageRole;
use thiserror::Error;

/// Result type for orchestrated calls
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Session store errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// No live session under this id
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    /// Append would break system-first user/assistant alternation
    #[error("Out-of-order message in session {session_id}: expected {expected}, found {found}")]
    RoleOrder {
        session_id: String,
        expected: String,
        found: MessageRole,
    },
}

/// Terminal outcomes of an orchestrated call other than success
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// Caller cancellation or elapsed timeout. Never retried.
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// Transport or remote failure of a model call
    #[error("Model call failed: {0:#}")]
    Model(anyhow::Error),

    /// Session store failure
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Rejected engine configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl OrchestrationError {
    /// Create a cancellation outcome
    pub fn cancelled<S: Into<String>>(reason: S) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this is the cancellation outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if the caller could reasonably issue the call again
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Model(_))
    }
}
