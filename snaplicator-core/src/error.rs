//! Error types for snaplicator.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.
//! Every fatal condition maps onto one [`ErrorKind`] so callers can branch on the
//! taxonomy without matching individual variants.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for snaplicator operations.
pub type Result<T> = std::result::Result<T, SnapError>;

/// Coarse error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidState,
    PermissionDenied,
    DependencyFailed,
    ResourceExhausted,
    ConfigurationError,
    Internal,
}

impl ErrorKind {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InvalidState => "invalid_state",
            Self::PermissionDenied => "permission_denied",
            Self::DependencyFailed => "dependency_failed",
            Self::ResourceExhausted => "resource_exhausted",
            Self::ConfigurationError => "configuration_error",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for snaplicator.
#[derive(Error, Debug)]
pub enum SnapError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Already exists: {what}")]
    AlreadyExists { what: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Dependency failed during {step}: {reason}")]
    DependencyFailed { step: String, reason: String },

    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigurationError { reason: String },

    // Subprocess errors
    #[error("Command `{program}` failed (exit code {code:?}): {stderr}")]
    CommandFailed { program: String, code: Option<i32>, stderr: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SnapError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState { reason: reason.into() }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied { reason: reason.into() }
    }

    pub fn dependency_failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyFailed { step: step.into(), reason: reason.into() }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::ConfigurationError { reason: reason.into() }
    }

    /// Taxonomy bucket of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::DependencyFailed { .. } => ErrorKind::DependencyFailed,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::ConfigurationError { .. } => ErrorKind::ConfigurationError,
            Self::CommandFailed { .. } | Self::Io { .. } | Self::Internal(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SnapError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(SnapError::permission_denied("x").kind(), ErrorKind::PermissionDenied);
        assert_eq!(
            SnapError::CommandFailed { program: "btrfs".into(), code: Some(1), stderr: "".into() }
                .kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_command_failed_surfaces_stderr() {
        let err = SnapError::CommandFailed {
            program: "btrfs".to_string(),
            code: Some(1),
            stderr: "ERROR: not a subvolume".to_string(),
        };
        assert!(err.to_string().contains("ERROR: not a subvolume"));
    }
}
