//! The per-collection metadata document.

use crate::error::{StorageError, StorageResult};
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index and version record of one collection.
///
/// This document is the authority on what a collection contains; record
/// documents may lag behind it.
///
/// ```json
/// { "uuid": "…", "last_modified": 1700000000.12,
///   "apps": [[1700000000.12, "app2"], [1699999000.0, "app1"]],
///   "etags": {"app1": "…", "app2": "…"},
///   "deleted": false }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// Collection uuid, `None` until the first write after creation or deletion.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Timestamp of the last committed write or deletion.
    #[serde(default)]
    pub last_modified: Timestamp,
    /// `(last_modified, origin)` pairs, newest first.
    #[serde(default)]
    pub apps: Vec<(Timestamp, String)>,
    /// Last known etag of each record document.
    #[serde(default)]
    pub etags: BTreeMap<String, String>,
    /// Whether a client deleted the collection.
    #[serde(default)]
    pub deleted: bool,
    /// Client that deleted the collection.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    /// Reason given for the deletion.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl MetadataDocument {
    /// Parses a stored metadata document.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the document for storage.
    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Fails with [`StorageError::CollectionDeleted`] if the collection is deleted.
    pub fn ensure_live(&self) -> StorageResult<()> {
        if self.deleted {
            return Err(StorageError::deleted(&self.client_id, &self.reason));
        }
        Ok(())
    }

    /// Returns the index entries modified strictly after `since`.
    ///
    /// The index is kept newest first, so this is a prefix of it.
    pub fn changed_since(&self, since: Timestamp) -> impl Iterator<Item = &(Timestamp, String)> {
        self.apps.iter().take_while(move |(modified, _)| *modified > since)
    }

    /// Records that `origin` was written at `now`.
    ///
    /// The index is left unsorted; [`MetadataDocument::finish_write`] sorts it.
    pub fn touch(&mut self, origin: &str, now: Timestamp) {
        match self.apps.iter_mut().find(|(_, o)| o == origin) {
            Some(entry) => entry.0 = now,
            None => self.apps.push((now, origin.to_string())),
        }
    }

    /// Closes a write batch committed at `now`.
    ///
    /// Sorts the index, undeletes the collection and assigns a uuid if it
    /// has none.
    pub fn finish_write(&mut self, now: Timestamp) {
        self.apps.sort_by(|a, b| b.cmp(a));
        if self.deleted {
            self.deleted = false;
            self.client_id.clear();
            self.reason.clear();
        }
        if self.uuid.as_deref().map_or(true, str::is_empty) {
            self.uuid = Some(uuid::Uuid::new_v4().simple().to_string());
        }
        self.last_modified = now;
    }

    /// Marks the collection deleted at `now` and returns the etags of the
    /// records it listed.
    pub fn mark_deleted(
        &mut self,
        client_id: &str,
        reason: &str,
        now: Timestamp,
    ) -> BTreeMap<String, String> {
        self.deleted = true;
        self.client_id = client_id.to_string();
        self.reason = reason.to_string();
        self.apps.clear();
        self.uuid = None;
        self.last_modified = now;
        std::mem::take(&mut self.etags)
    }
}

/// A metadata document together with the etag it was stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedMetadata {
    /// Etag of the stored metadata document.
    pub etag: String,
    /// The decoded document.
    pub document: MetadataDocument,
}
