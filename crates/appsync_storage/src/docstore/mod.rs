//! Document-store backend.
//!
//! Records live one JSON document per application and one metadata document
//! per collection in a key/value [`DocumentStore`] that supports conditional
//! writes. See [`DocumentStoreBackend`] for the write protocol.

mod backend;
mod memory;
mod metadata;

pub use backend::DocumentStoreBackend;
pub use memory::MemoryDocumentStore;
pub use metadata::{MetadataDocument, VersionedMetadata};

use crate::error::StorageError;
use thiserror::Error;

/// Result type for document-store client calls.
pub type DocumentResult<T> = Result<T, DocumentStoreError>;

/// A stored document and its current etag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Serialized JSON value.
    pub value: String,
    /// Token that must be presented to overwrite or delete this version.
    pub etag: String,
}

/// Precondition for a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition<'a> {
    /// The key must not exist.
    Absent,
    /// The key must exist with this etag.
    Matches(&'a str),
}

impl<'a> WriteCondition<'a> {
    /// Maps a remembered etag to a condition; the empty etag means "create".
    pub fn from_etag(etag: &'a str) -> Self {
        if etag.is_empty() {
            WriteCondition::Absent
        } else {
            WriteCondition::Matches(etag)
        }
    }
}

/// Errors reported by a document-store client.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The write precondition did not hold.
    #[error("conditional write failed for {0}")]
    Conflict(String),

    /// The key does not exist.
    #[error("no document at {0}")]
    NotFound(String),

    /// The store rejected the caller's credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The store reported an internal fault.
    #[error("server error: {0}")]
    Server(String),
}

impl From<DocumentStoreError> for StorageError {
    fn from(err: DocumentStoreError) -> Self {
        match err {
            DocumentStoreError::Conflict(_) => StorageError::EditConflict,
            DocumentStoreError::Unauthorized(msg) => StorageError::Auth(msg),
            DocumentStoreError::Connection(msg) => StorageError::Connection(msg),
            err @ (DocumentStoreError::NotFound(_) | DocumentStoreError::Server(_)) => {
                StorageError::Server(err.to_string())
            }
        }
    }
}

/// A key/value document store with per-key conditional writes.
///
/// Keys are scoped per user. Every successful write returns a fresh etag;
/// writes and deletes only succeed when their [`WriteCondition`] holds at
/// the moment they are applied.
pub trait DocumentStore: Send + Sync {
    /// Returns the document at `key`, if any.
    fn get(&self, user: &str, key: &str) -> DocumentResult<Option<Document>>;

    /// Writes `value` at `key` if `condition` holds, returning the new etag.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Conflict`] if the condition does not hold.
    fn put(
        &self,
        user: &str,
        key: &str,
        value: &str,
        condition: WriteCondition<'_>,
    ) -> DocumentResult<String>;

    /// Deletes `key` if its etag matches.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotFound`] for a missing key and
    /// [`DocumentStoreError::Conflict`] for an etag mismatch.
    fn delete(&self, user: &str, key: &str, etag: &str) -> DocumentResult<()>;
}
