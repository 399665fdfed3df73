//! Error types for synchronized collections.

use thiserror::Error;

/// Main error type for sync operations.
///
/// `Clone` so that subscription-level failures can be carried inside a
/// [`CollectionSnapshot`](crate::types::CollectionSnapshot) and fanned out to
/// every observer.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A read or subscription could not be established. Transient.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A create, replace or delete did not commit. Its side effects are not
    /// guaranteed absent.
    #[error("Remote write failed for document {id}: {reason}")]
    RemoteWriteFailed { id: String, reason: String },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Operation invoked on a store that is not live. Not retryable.
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid document id: {0:?}")]
    InvalidDocumentId(String),

    #[error("Invalid collection path: {0:?}")]
    InvalidPath(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    pub fn write_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::RemoteWriteFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable(_) | SyncError::RemoteWriteFailed { .. }
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
