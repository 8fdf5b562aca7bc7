//! Storage error types for the resource store.
//!
//! This module defines all error types that can occur during store operations,
//! plus their mapping onto status bands and operation outcomes.

use std::fmt;

use octofhir_core::{CoreError, IssueSeverity, OperationOutcome};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested resource or version was never stored.
    #[error("Resource not found: {resource_type}/{id}{}", version_suffix(.version))]
    NotFound {
        resource_type: String,
        id: String,
        version: Option<String>,
    },

    /// A version expectation did not hold, or the write could not be
    /// serialized in time.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// The input was rejected before anything was written.
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// A single-match lookup hit more than one resource.
    #[error("Ambiguous match: {count} {resource_type} resources matched")]
    AmbiguousMatch { resource_type: String, count: usize },

    /// A store invariant was violated.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn version_suffix(version: &Option<String>) -> String {
    version
        .as_deref()
        .map(|v| format!("/_history/{v}"))
        .unwrap_or_default()
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    /// Creates a new `NotFound` error for one version.
    #[must_use]
    pub fn version_not_found(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
            version: Some(version.into()),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a `Conflict` error for a failed version expectation.
    #[must_use]
    pub fn version_conflict(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::conflict(format!("expected version {expected}, found {actual}"))
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new `AmbiguousMatch` error.
    #[must_use]
    pub fn ambiguous(resource_type: impl Into<String>, count: usize) -> Self {
        Self::AmbiguousMatch {
            resource_type: resource_type.into(),
            count,
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this is a validation error.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns `true` if this is an ambiguous match error.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::AmbiguousMatch { .. })
    }

    /// Returns `true` if this is an internal error.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Only conflicts are worth retrying unchanged.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.is_conflict()
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::AmbiguousMatch { .. } => ErrorCategory::Ambiguous,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// HTTP-style status band for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Validation { .. } => 422,
            Self::AmbiguousMatch { .. } => 412,
            Self::Internal { .. } => 500,
        }
    }

    /// Status band when the error came out of a search.
    ///
    /// Bad search input is a malformed request rather than an unprocessable
    /// resource.
    #[must_use]
    pub fn search_status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            other => other.status_code(),
        }
    }

    #[must_use]
    pub fn severity(&self) -> IssueSeverity {
        IssueSeverity::from_status(self.status_code())
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        if err.is_server_error() {
            Self::internal(err.to_string())
        } else {
            Self::validation(err.to_string())
        }
    }
}

impl From<&StorageError> for OperationOutcome {
    fn from(err: &StorageError) -> Self {
        let outcome = OperationOutcome::new().message_with_status(err.status_code(), err.to_string());
        match err {
            StorageError::Internal { .. } => {
                outcome.message(format!("Error kind: {}", err.category()))
            }
            _ => outcome,
        }
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Resource not found.
    NotFound,
    /// Version expectation or lock budget.
    Conflict,
    /// Validation error.
    Validation,
    /// More than one match for a single-match lookup.
    Ambiguous,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Ambiguous => write!(f, "ambiguous"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
