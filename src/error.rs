//! Error types for sqlite-jobs.
//!
//! Uses thiserror for derive macros. Every variant maps to a process exit
//! code so the CLI can report failures consistently.

use crate::exit_codes;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A resource could not be locked before its deadline.
    #[error("timed out after {timeout:?} waiting for lock on '{resource}'")]
    LockTimeout { resource: String, timeout: Duration },

    /// Cooperative cancellation was observed while waiting.
    #[error("operation was canceled")]
    Canceled,

    /// A required identifier was missing or a range/count was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A dequeue request spans queues served by different providers.
    #[error(
        "multiple queue providers registered for queues: {}. Only one kind of persistent queue may be used per fetch",
        .queues.join(", ")
    )]
    DuplicateProviderConflict { queues: Vec<String> },

    /// The lock registry was used after it was torn down.
    #[error("lock registry has been disposed")]
    RegistryDisposed,

    /// SQLite reported an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem operation failed.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A stored record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Build an I/O error tagged with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for an `InvalidArgument` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        StorageError::InvalidArgument(message.into())
    }

    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            StorageError::InvalidArgument(_)
            | StorageError::DuplicateProviderConflict { .. }
            | StorageError::Config(_) => exit_codes::USER_ERROR,
            StorageError::RegistryDisposed
            | StorageError::Database(_)
            | StorageError::Io { .. }
            | StorageError::Serialization(_) => exit_codes::STORAGE_FAILURE,
            StorageError::LockTimeout { .. } => exit_codes::LOCK_FAILURE,
            StorageError::Canceled => exit_codes::CANCELED,
        }
    }
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Reject `None`-like identifiers before any I/O happens.
pub(crate) fn require_non_blank(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StorageError::invalid(format!("`{}` must not be empty", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_has_lock_exit_code() {
        let err = StorageError::LockTimeout {
            resource: "Set:Lock".to_string(),
            timeout: Duration::from_millis(100),
        };
        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
        assert!(err.to_string().contains("Set:Lock"));
    }

    #[test]
    fn user_errors_share_exit_code() {
        let err = StorageError::invalid("bad");
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);

        let err = StorageError::DuplicateProviderConflict {
            queues: vec!["default".to_string(), "critical".to_string()],
        };
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
        assert!(err.to_string().contains("default, critical"));
    }

    #[test]
    fn canceled_has_own_exit_code() {
        assert_eq!(StorageError::Canceled.exit_code(), exit_codes::CANCELED);
    }

    #[test]
    fn require_non_blank_rejects_whitespace() {
        assert!(require_non_blank("  ", "key").is_err());
        assert!(require_non_blank("key", "key").is_ok());
    }
}
