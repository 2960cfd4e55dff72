//! Unified application error type.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Kestrel applications.
///
/// Library crates keep their own, more precise error enums and convert into
/// this type at the application boundary (configuration loading, binaries).
#[derive(Error, Debug)]
pub enum KestrelError {
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Queue or failed job backend (SQLite, Redis) unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KestrelError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Timeout(_)
        )
    }

    /// Process exit status for a binary failing with this error, following
    /// the BSD `sysexits` codes.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.is_retriable() {
            return 75;
        }
        match self {
            Self::Validation(_) => 65,
            Self::NotFound { .. } => 66,
            Self::Configuration(_) => 78,
            _ => 70,
        }
    }
}

impl From<serde_json::Error> for KestrelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Field-level validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name
    pub field: String,
    /// Error message
    pub message: String,
    /// Error code
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(KestrelError::not_found("Job", 1).error_code(), "NOT_FOUND");
        assert_eq!(KestrelError::validation("bad").error_code(), "VALIDATION_ERROR");
        assert_eq!(
            KestrelError::configuration("missing").error_code(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(KestrelError::internal("oops").error_code(), "INTERNAL_ERROR");
        assert_eq!(KestrelError::Timeout("t".to_string()).error_code(), "TIMEOUT");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(KestrelError::Storage("redis down".to_string()).is_retriable());
        assert!(!KestrelError::validation("bad input").is_retriable());
        assert!(!KestrelError::not_found("Job", 1).is_retriable());
    }

    #[test]
    fn test_not_found_display() {
        let err = KestrelError::not_found("FailedJob", "abc");
        let msg = err.to_string();
        assert!(msg.contains("FailedJob") && msg.contains("abc"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = KestrelError::from(json_err);
        assert!(matches!(err, KestrelError::Internal(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(KestrelError::Storage("locked".to_string()).exit_code(), 75);
        assert_eq!(KestrelError::Timeout("slow".to_string()).exit_code(), 75);
        assert_eq!(KestrelError::validation("bad id").exit_code(), 65);
        assert_eq!(KestrelError::not_found("Job", "abc").exit_code(), 66);
        assert_eq!(KestrelError::configuration("no driver").exit_code(), 78);
        assert_eq!(KestrelError::internal("oops").exit_code(), 70);
    }
}
