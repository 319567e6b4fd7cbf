//! Error types for the match lifecycle service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Typed variants can be recovered from an
//! `anyhow::Error` with `downcast_ref::<MatchmakingError>()`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific match lifecycle scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// A human decision that is not allowed in the current state
    #[error("Action rejected: {reason}")]
    InvalidAction { reason: String },

    /// Not enough game accounts to cover the players lacking one
    #[error("Not enough accounts: {needed} needed, {available} available")]
    ResourceExhausted { needed: usize, available: usize },

    #[error("{kind} not found: {id}")]
    ElementNotFound { kind: &'static str, id: String },

    /// External API unreachable after its own retry budget
    #[error("External service unavailable ({endpoint}): {message}")]
    ExternalUnavailable { endpoint: String, message: String },

    #[error("Invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    pub fn invalid_action(reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::ElementNotFound {
            kind,
            id: id.to_string(),
        }
    }
}
