//! In-memory document store for testing.

use super::{Document, DocumentResult, DocumentStore, DocumentStoreError, WriteCondition};
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory [`DocumentStore`].
///
/// Each write is applied atomically under a lock, which gives the same
/// compare-and-swap semantics a real document store provides per key.
///
/// # Example
///
/// ```rust
/// use appsync_storage::docstore::{DocumentStore, MemoryDocumentStore, WriteCondition};
///
/// let store = MemoryDocumentStore::new();
/// let etag = store.put("u1", "k", "{}", WriteCondition::Absent).unwrap();
/// assert!(store.put("u1", "k", "{}", WriteCondition::Absent).is_err());
/// store.put("u1", "k", "[]", WriteCondition::Matches(&etag)).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<(String, String), Document>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the keys stored for `user`, sorted.
    pub fn keys(&self, user: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .documents
            .read()
            .keys()
            .filter(|(u, _)| u == user)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Returns the total number of documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true if the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn new_etag() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, user: &str, key: &str) -> DocumentResult<Option<Document>> {
        Ok(self
            .documents
            .read()
            .get(&(user.to_string(), key.to_string()))
            .cloned())
    }

    fn put(
        &self,
        user: &str,
        key: &str,
        value: &str,
        condition: WriteCondition<'_>,
    ) -> DocumentResult<String> {
        let mut documents = self.documents.write();
        let id = (user.to_string(), key.to_string());
        let holds = match (condition, documents.get(&id)) {
            (WriteCondition::Absent, None) => true,
            (WriteCondition::Matches(expected), Some(current)) => current.etag == expected,
            _ => false,
        };
        if !holds {
            return Err(DocumentStoreError::Conflict(key.to_string()));
        }

        let etag = Self::new_etag();
        documents.insert(
            id,
            Document {
                value: value.to_string(),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    fn delete(&self, user: &str, key: &str, etag: &str) -> DocumentResult<()> {
        let mut documents = self.documents.write();
        let id = (user.to_string(), key.to_string());
        match documents.get(&id) {
            None => Err(DocumentStoreError::NotFound(key.to_string())),
            Some(current) if current.etag != etag => {
                Err(DocumentStoreError::Conflict(key.to_string()))
            }
            Some(_) => {
                documents.remove(&id);
                Ok(())
            }
        }
    }
}
