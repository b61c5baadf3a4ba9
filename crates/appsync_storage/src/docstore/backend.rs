//! The document-store storage engine.

use super::{
    DocumentStore, DocumentStoreError, MetadataDocument, VersionedMetadata, WriteCondition,
};
use crate::application::Application;
use crate::auth::TokenBroker;
use crate::cache::MetadataCache;
use crate::engine::StorageEngine;
use crate::error::{StorageError, StorageResult};
use crate::timestamp::Timestamp;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A [`StorageEngine`] over a [`DocumentStore`] with conditional writes.
///
/// Each collection has one metadata document (`<collection>::meta`) holding
/// the index of origins, their etags and the deletion markers, and one
/// document per record (`<collection>::item::<origin>`).
///
/// # Write protocol
///
/// A batch remembers the etag of the metadata document it started from,
/// writes each record conditionally on the etag the metadata last saw for
/// it, then commits the metadata conditionally on the remembered etag.
/// A record collision is repaired in the metadata (the winner's etag is
/// adopted) and reported as [`StorageError::EditConflict`] once the batch
/// has been committed; already applied writes are never rolled back.
pub struct DocumentStoreBackend {
    store: Arc<dyn DocumentStore>,
    broker: Arc<dyn TokenBroker>,
    cache: Option<MetadataCache>,
}

/// Outcome of writing one record.
enum RecordWrite {
    Written(String),
    Conflict(Option<String>),
}

impl DocumentStoreBackend {
    /// Creates an engine without a metadata cache.
    pub fn new(store: Arc<dyn DocumentStore>, broker: Arc<dyn TokenBroker>) -> Self {
        Self {
            store,
            broker,
            cache: None,
        }
    }

    /// Puts `cache` in front of every metadata read and write.
    #[must_use]
    pub fn with_cache(mut self, cache: MetadataCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn meta_key(collection: &str) -> String {
        format!("{collection}::meta")
    }

    fn item_key(collection: &str, origin: &str) -> String {
        format!("{collection}::item::{origin}")
    }

    fn fetch_metadata(
        &self,
        user: &str,
        collection: &str,
    ) -> StorageResult<Option<VersionedMetadata>> {
        let Some(doc) = self.store.get(user, &Self::meta_key(collection))? else {
            return Ok(None);
        };
        Ok(Some(VersionedMetadata {
            document: MetadataDocument::from_json(&doc.value)?,
            etag: doc.etag,
        }))
    }

    fn load_metadata(
        &self,
        user: &str,
        collection: &str,
    ) -> StorageResult<Option<VersionedMetadata>> {
        match &self.cache {
            Some(cache) => {
                cache.get_or_fetch(user, collection, || self.fetch_metadata(user, collection))
            }
            None => self.fetch_metadata(user, collection),
        }
    }

    /// Loads metadata for a read, failing on a deleted collection.
    fn live_metadata(
        &self,
        user: &str,
        collection: &str,
    ) -> StorageResult<Option<MetadataDocument>> {
        let Some(meta) = self.load_metadata(user, collection)? else {
            return Ok(None);
        };
        meta.document.ensure_live()?;
        Ok(Some(meta.document))
    }

    /// Conditionally commits `document` over the version tagged `expected`.
    fn store_metadata(
        &self,
        user: &str,
        collection: &str,
        document: MetadataDocument,
        expected: &str,
    ) -> StorageResult<()> {
        let written = self.store.put(
            user,
            &Self::meta_key(collection),
            &document.to_json()?,
            WriteCondition::from_etag(expected),
        );
        match written {
            Ok(etag) => {
                if let Some(cache) = &self.cache {
                    cache.put(user, collection, &VersionedMetadata { etag, document });
                }
                Ok(())
            }
            Err(DocumentStoreError::Conflict(_)) => {
                debug!(%user, %collection, "metadata changed under the batch");
                if let Some(cache) = &self.cache {
                    cache.invalidate(user, collection);
                }
                Err(StorageError::EditConflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes one record conditionally on the etag the metadata knows.
    ///
    /// On a collision the current record decides: identical content is our
    /// own earlier write and is adopted silently, anything else is a
    /// conflict whose etag (if the record still exists) is adopted so the
    /// next attempt can overwrite it.
    fn write_record(
        &self,
        user: &str,
        key: &str,
        app: &Application,
        known_etag: &str,
    ) -> StorageResult<RecordWrite> {
        let json = app.to_json_string()?;
        match self
            .store
            .put(user, key, &json, WriteCondition::from_etag(known_etag))
        {
            Ok(etag) => return Ok(RecordWrite::Written(etag)),
            Err(DocumentStoreError::Conflict(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let Some(current) = self.store.get(user, key)? else {
            debug!(%user, %key, "record vanished during write");
            return Ok(RecordWrite::Conflict(None));
        };
        let ours = Value::Object(app.fields().clone());
        let same = serde_json::from_str::<Value>(&current.value).is_ok_and(|theirs| theirs == ours);
        if same {
            Ok(RecordWrite::Written(current.etag))
        } else {
            debug!(%user, %key, "record edited concurrently");
            Ok(RecordWrite::Conflict(Some(current.etag)))
        }
    }
}

impl StorageEngine for DocumentStoreBackend {
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<(String, String)> {
        self.broker.verify(assertion, audience)
    }

    fn get_last_modified(
        &self,
        user: &str,
        collection: &str,
        token: &str,
    ) -> StorageResult<Option<Timestamp>> {
        self.broker.authorize(user, token)?;
        Ok(self
            .live_metadata(user, collection)?
            .map(|meta| meta.last_modified))
    }

    fn get_uuid(&self, user: &str, collection: &str, token: &str) -> StorageResult<Option<String>> {
        self.broker.authorize(user, token)?;
        Ok(self
            .live_metadata(user, collection)?
            .and_then(|meta| meta.uuid)
            .filter(|uuid| !uuid.is_empty()))
    }

    fn get_applications(
        &self,
        user: &str,
        collection: &str,
        since: Timestamp,
        token: &str,
    ) -> StorageResult<Vec<(Timestamp, Application)>> {
        self.broker.authorize(user, token)?;
        let Some(meta) = self.live_metadata(user, collection)? else {
            return Ok(Vec::new());
        };
        if meta.last_modified < since {
            return Ok(Vec::new());
        }

        let mut apps = Vec::new();
        for (modified, origin) in meta.changed_since(since) {
            let key = Self::item_key(collection, origin);
            match self.store.get(user, &key)? {
                Some(doc) => apps.push((*modified, Application::from_json_str(&doc.value)?)),
                None => warn!(%user, %key, "indexed record is missing"),
            }
        }
        Ok(apps)
    }

    fn add_applications(
        &self,
        user: &str,
        collection: &str,
        applications: &[Application],
        token: &str,
    ) -> StorageResult<Timestamp> {
        self.broker.authorize(user, token)?;
        let (mut meta, expected) = match self.load_metadata(user, collection)? {
            Some(VersionedMetadata { etag, document }) => (document, etag),
            None => (MetadataDocument::default(), String::new()),
        };

        let now = Timestamp::now().after(meta.last_modified);
        let mut conflicts = 0usize;
        for app in applications {
            let origin = app.origin();
            let key = Self::item_key(collection, origin);
            let known = meta.etags.get(origin).cloned().unwrap_or_default();
            match self.write_record(user, &key, app, &known)? {
                RecordWrite::Written(etag) => {
                    meta.etags.insert(origin.to_string(), etag);
                }
                RecordWrite::Conflict(Some(etag)) => {
                    conflicts += 1;
                    meta.etags.insert(origin.to_string(), etag);
                }
                RecordWrite::Conflict(None) => {
                    conflicts += 1;
                    meta.etags.remove(origin);
                }
            }
            meta.touch(origin, now);
        }

        meta.finish_write(now);
        self.store_metadata(user, collection, meta, &expected)?;

        if conflicts > 0 {
            debug!(%user, %collection, conflicts, "batch committed with conflicts");
            return Err(StorageError::EditConflict);
        }
        Ok(now)
    }

    fn delete(
        &self,
        user: &str,
        collection: &str,
        client_id: &str,
        reason: &str,
        token: &str,
    ) -> StorageResult<()> {
        self.broker.authorize(user, token)?;
        let (mut meta, expected) = match self.load_metadata(user, collection)? {
            Some(VersionedMetadata { etag, document }) => (document, etag),
            None => (MetadataDocument::default(), String::new()),
        };
        if meta.deleted {
            return Ok(());
        }

        let now = Timestamp::now().after(meta.last_modified);
        let etags = meta.mark_deleted(client_id, reason, now);
        self.store_metadata(user, collection, meta, &expected)?;
        info!(%user, %collection, %client_id, "collection deleted");

        for (origin, etag) in etags.iter().filter(|(_, etag)| !etag.is_empty()) {
            let key = Self::item_key(collection, origin);
            match self.store.delete(user, &key, etag) {
                Ok(()) => {}
                Err(DocumentStoreError::Conflict(_) | DocumentStoreError::NotFound(_)) => {
                    debug!(%user, %key, "record changed before cleanup, leaving it");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PassThroughBroker;
    use crate::docstore::MemoryDocumentStore;

    const TOKEN: &str = "token";

    fn engine() -> (Arc<MemoryDocumentStore>, DocumentStoreBackend) {
        let store = Arc::new(MemoryDocumentStore::new());
        let backend = DocumentStoreBackend::new(store.clone(), Arc::new(PassThroughBroker::new()));
        (store, backend)
    }

    fn app(origin: &str, name: &str) -> Application {
        Application::new(origin).with_field("name", name)
    }

    #[test]
    fn key_layout() {
        assert_eq!(DocumentStoreBackend::meta_key("apps"), "apps::meta");
        assert_eq!(
            DocumentStoreBackend::item_key("apps", "https://a.example"),
            "apps::item::https://a.example"
        );
    }

    #[test]
    fn fresh_collection_is_empty() {
        let (_, engine) = engine();
        assert_eq!(engine.get_last_modified("u1", "apps", TOKEN).unwrap(), None);
        assert_eq!(engine.get_uuid("u1", "apps", TOKEN).unwrap(), None);
        assert!(engine
            .get_applications("u1", "apps", Timestamp::ZERO, TOKEN)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn batch_writes_records_and_metadata() {
        let (store, engine) = engine();
        let now = engine
            .add_applications("u1", "apps", &[app("a", "1"), app("b", "2")], TOKEN)
            .unwrap();

        assert_eq!(
            store.keys("u1"),
            vec!["apps::item::a", "apps::item::b", "apps::meta"]
        );
        assert_eq!(engine.get_last_modified("u1", "apps", TOKEN).unwrap(), Some(now));
        assert!(engine.get_uuid("u1", "apps", TOKEN).unwrap().is_some());
    }

    #[test]
    fn reads_are_newest_first() {
        let (_, engine) = engine();
        let first = engine
            .add_applications("u1", "apps", &[app("a", "1")], TOKEN)
            .unwrap();
        engine
            .add_applications("u1", "apps", &[app("b", "2")], TOKEN)
            .unwrap();

        let apps = engine
            .get_applications("u1", "apps", Timestamp::ZERO, TOKEN)
            .unwrap();
        let origins: Vec<_> = apps.iter().map(|(_, app)| app.origin()).collect();
        assert_eq!(origins, vec!["b", "a"]);

        let newer = engine.get_applications("u1", "apps", first, TOKEN).unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].1.origin(), "b");
    }

    #[test]
    fn stale_record_etag_is_a_conflict_but_still_committed() {
        let (store, engine) = engine();
        engine
            .add_applications("u1", "apps", &[app("a", "1")], TOKEN)
            .unwrap();

        // Another writer replaces the record behind the metadata's back.
        let current = store.get("u1", "apps::item::a").unwrap().unwrap();
        store
            .put(
                "u1",
                "apps::item::a",
                &app("a", "theirs").to_json_string().unwrap(),
                WriteCondition::Matches(&current.etag),
            )
            .unwrap();

        let err = engine
            .add_applications("u1", "apps", &[app("a", "mine")], TOKEN)
            .unwrap_err();
        assert!(matches!(err, StorageError::EditConflict));

        // The winner's etag was adopted, so the retry goes through.
        engine
            .add_applications("u1", "apps", &[app("a", "mine")], TOKEN)
            .unwrap();
        let apps = engine
            .get_applications("u1", "apps", Timestamp::ZERO, TOKEN)
            .unwrap();
        assert_eq!(apps[0].1, app("a", "mine"));
    }

    #[test]
    fn identical_content_is_not_a_conflict() {
        let (store, engine) = engine();
        engine
            .add_applications("u1", "apps", &[app("a", "1")], TOKEN)
            .unwrap();

        let current = store.get("u1", "apps::item::a").unwrap().unwrap();
        store
            .put(
                "u1",
                "apps::item::a",
                &app("a", "2").to_json_string().unwrap(),
                WriteCondition::Matches(&current.etag),
            )
            .unwrap();

        engine
            .add_applications("u1", "apps", &[app("a", "2")], TOKEN)
            .unwrap();
    }

    #[test]
    fn delete_removes_records_and_blocks_reads() {
        let (store, engine) = engine();
        engine
            .add_applications("u1", "apps", &[app("a", "1"), app("b", "2")], TOKEN)
            .unwrap();
        engine.delete("u1", "apps", "c1", "gone", TOKEN).unwrap();

        assert_eq!(store.keys("u1"), vec!["apps::meta"]);
        for err in [
            engine.get_uuid("u1", "apps", TOKEN).unwrap_err(),
            engine.get_last_modified("u1", "apps", TOKEN).unwrap_err(),
            engine
                .get_applications("u1", "apps", Timestamp::ZERO, TOKEN)
                .unwrap_err(),
        ] {
            assert!(matches!(
                err,
                StorageError::CollectionDeleted { ref client_id, ref reason }
                    if client_id == "c1" && reason == "gone"
            ));
        }

        // Deleting again keeps the first markers.
        engine.delete("u1", "apps", "c2", "again", TOKEN).unwrap();
        assert!(matches!(
            engine.get_uuid("u1", "apps", TOKEN),
            Err(StorageError::CollectionDeleted { client_id, .. }) if client_id == "c1"
        ));
    }

    #[test]
    fn last_modified_advances_across_delete_and_recreate() {
        let (_, engine) = engine();
        let written = engine
            .add_applications("u1", "apps", &[app("a", "1")], TOKEN)
            .unwrap();
        let uuid = engine.get_uuid("u1", "apps", TOKEN).unwrap();

        engine.delete("u1", "apps", "c1", "r", TOKEN).unwrap();
        let rewritten = engine
            .add_applications("u1", "apps", &[app("a", "1")], TOKEN)
            .unwrap();

        assert!(rewritten > written);
        assert_ne!(engine.get_uuid("u1", "apps", TOKEN).unwrap(), uuid);
    }
}
