//! Error types and handling
//!
//! This module provides the error types used throughout the TasksBot engine.
//! All errors implement the `TasksbotErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! User hints are static strings. They never echo raw user input, storage
//! connection strings or file paths back to a chat.

use thiserror::Error;

/// Trait for TasksBot error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait TasksbotErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display in a chat and does not contain:
    /// - Raw user input
    /// - File paths or connection strings
    /// - Internal implementation details
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are answered with a re-prompt or can be retried.
    /// Non-recoverable errors stop the process at startup.
    fn is_recoverable(&self) -> bool;

    /// Returns whether the error is transient and the whole call may be retried
    /// by the transport layer.
    fn is_transient(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: invalid settings or direction definitions (fatal at startup)
/// - **User input**: validation failures, unknown directions or flows (re-prompt)
/// - **Policy**: a direction rule blocks the commit of a task
/// - **Storage**: the state store or task repository cannot be reached (transient)
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, TasksbotErrorExt};
///
/// let error = EngineError::UnknownDirection("bakery".to_string());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::DuplicateDirection("coffee".to_string());
/// assert!(!fatal.is_recoverable());
///
/// let transient = EngineError::StorageUnavailable("connection refused".to_string());
/// assert!(transient.is_transient());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid direction config: {0}")]
    InvalidDirectionConfig(String),

    #[error("Duplicate direction: {0}")]
    DuplicateDirection(String),

    #[error("Direction registry is sealed")]
    RegistrySealed,

    // User input errors
    #[error("Unknown direction: {0}")]
    UnknownDirection(String),

    #[error("Unknown flow '{flow}' in direction '{direction}'")]
    UnknownFlow { direction: String, flow: String },

    #[error("Invalid value for '{field}': {reason}")]
    Validation { field: String, reason: String },

    // Policy errors
    #[error("Field '{field}' is required by rule '{rule}'")]
    PolicyViolation { field: String, rule: String },

    // Storage errors
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for wrapping any storage failure.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl TasksbotErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::InvalidDirectionConfig(_) => "Check the directions file for missing or malformed keys",
            Self::DuplicateDirection(_) => "Two directions share the same key",
            Self::RegistrySealed => "Directions cannot be added while the bot is running",

            // User input errors
            Self::UnknownDirection(_) => "Pick one of the listed directions",
            Self::UnknownFlow { .. } => "Pick one of the listed menu items",
            Self::Validation { .. } => "Please check the value and send it again",

            // Policy errors
            Self::PolicyViolation { .. } => "Some required information is missing",

            // Storage errors
            Self::StorageUnavailable(_) => "Storage is temporarily unavailable. Try again shortly",

            // Network errors
            Self::Network(_) => "Network operation failed. Check your connection",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::InvalidDirectionConfig(_)
            | Self::DuplicateDirection(_)
            | Self::RegistrySealed => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(!EngineError::Config("x".into()).is_recoverable());
        assert!(!EngineError::RegistrySealed.is_recoverable());
        assert!(!EngineError::InvalidDirectionConfig("menu".into()).is_recoverable());
    }

    #[test]
    fn test_user_errors_are_recoverable_but_not_transient() {
        let err = EngineError::Validation {
            field: "volume".into(),
            reason: "expected a number".into(),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Invalid value for 'volume': expected a number");
    }

    #[test]
    fn test_policy_violation_names_field() {
        let err = EngineError::PolicyViolation {
            field: "photo".into(),
            rule: "photo-on-shortage".into(),
        };
        assert!(err.to_string().contains("photo"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_storage_helper() {
        let err = EngineError::storage("pool timed out");
        assert!(err.is_transient());
        assert!(err.to_string().contains("pool timed out"));
    }
}
