//! Error taxonomy shared by every storage engine.
//!
//! Backend-library errors never cross the engine boundary: each backend
//! translates its own failures into [`StorageError`] so the calling layer
//! only ever matches on these variants.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a storage engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Bad or expired token, or a failed identity check.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backend could not be reached, even after retrying.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend reported an internal fault.
    #[error("server error: {0}")]
    Server(String),

    /// A concurrent write collided with this one.
    ///
    /// Writes that could be applied have been applied; the caller may retry
    /// the whole operation.
    #[error("edit conflict: the collection was modified concurrently")]
    EditConflict,

    /// The collection has been deleted by a client.
    #[error("collection deleted by {client_id:?}: {reason}")]
    CollectionDeleted {
        /// Client that issued the deletion.
        client_id: String,
        /// Reason given for the deletion.
        reason: String,
    },

    /// The caller supplied a record the engine cannot store.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A stored document could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Creates a [`StorageError::CollectionDeleted`] error.
    pub fn deleted(client_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CollectionDeleted {
            client_id: client_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the caller caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::Auth(_)
                | StorageError::EditConflict
                | StorageError::CollectionDeleted { .. }
                | StorageError::InvalidRecord(_)
        )
    }

    /// Returns true if the backend caused the error.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            StorageError::Connection(_) | StorageError::Server(_) | StorageError::Serialization(_)
        )
    }

    /// Returns true if repeating the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::EditConflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(StorageError::Auth("bad token".into()).is_client_error());
        assert!(StorageError::deleted("c1", "r").is_client_error());
        assert!(StorageError::Server("oops".into()).is_server_error());
        assert!(!StorageError::EditConflict.is_server_error());
    }

    #[test]
    fn retryable_errors() {
        assert!(StorageError::EditConflict.is_retryable());
        assert!(StorageError::Connection("lost".into()).is_retryable());
        assert!(!StorageError::Server("boom".into()).is_retryable());
        assert!(!StorageError::deleted("c1", "r").is_retryable());
    }

    #[test]
    fn deleted_display() {
        let msg = StorageError::deleted("phone", "reset").to_string();
        assert!(msg.contains("phone"));
        assert!(msg.contains("reset"));
    }
}
