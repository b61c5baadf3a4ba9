//! The storage engine contract.

use crate::application::Application;
use crate::error::StorageResult;
use crate::timestamp::Timestamp;
use std::sync::Arc;

/// The contract every AppSync storage backend satisfies.
///
/// The request layer holds exactly one engine, chosen at startup, and talks
/// to storage only through this trait. Every operation except [`verify`]
/// takes the session token previously returned by [`verify`].
///
/// # Invariants
///
/// - A collection's `last_modified` never decreases across successful writes
/// - A collection's uuid changes once per delete/recreate cycle and is stable otherwise
/// - Reads of a deleted collection fail with
///   [`StorageError::CollectionDeleted`](crate::StorageError::CollectionDeleted)
///   until the next write undeletes it
///
/// # Implementors
///
/// - [`crate::DocumentStoreBackend`] - Optimistic concurrency over a key/value document store
/// - [`crate::RelationalBackend`] - SQLite tables, last write wins
/// - [`crate::MirroredBackend`] - Dual writes for migrating between backends
/// - [`crate::MemoryBackend`] - In-process reference engine
///
/// [`verify`]: StorageEngine::verify
pub trait StorageEngine: Send + Sync {
    /// Verifies an identity assertion and opens a session.
    ///
    /// Returns the verified email and an opaque session token.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Auth`](crate::StorageError::Auth) if the
    /// assertion is invalid for `audience`.
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<(String, String)>;

    /// Returns the collection's last-modified time, or `None` before the
    /// first write.
    fn get_last_modified(
        &self,
        user: &str,
        collection: &str,
        token: &str,
    ) -> StorageResult<Option<Timestamp>>;

    /// Returns the collection's uuid, or `None` before the first write.
    fn get_uuid(&self, user: &str, collection: &str, token: &str) -> StorageResult<Option<String>>;

    /// Returns the records modified after `since`, with their timestamps.
    fn get_applications(
        &self,
        user: &str,
        collection: &str,
        since: Timestamp,
        token: &str,
    ) -> StorageResult<Vec<(Timestamp, Application)>>;

    /// Stores a batch of records and returns the commit timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EditConflict`](crate::StorageError::EditConflict)
    /// if any record collided with a concurrent edit. Engines with conflict
    /// detection still apply every write they can before reporting it.
    fn add_applications(
        &self,
        user: &str,
        collection: &str,
        applications: &[Application],
        token: &str,
    ) -> StorageResult<Timestamp>;

    /// Marks the collection deleted. Deleting twice is a no-op.
    fn delete(
        &self,
        user: &str,
        collection: &str,
        client_id: &str,
        reason: &str,
        token: &str,
    ) -> StorageResult<()>;
}

macro_rules! forward_engine {
    ($ptr:ty) => {
        impl<E: StorageEngine + ?Sized> StorageEngine for $ptr {
            fn verify(&self, assertion: &str, audience: &str) -> StorageResult<(String, String)> {
                (**self).verify(assertion, audience)
            }

            fn get_last_modified(
                &self,
                user: &str,
                collection: &str,
                token: &str,
            ) -> StorageResult<Option<Timestamp>> {
                (**self).get_last_modified(user, collection, token)
            }

            fn get_uuid(
                &self,
                user: &str,
                collection: &str,
                token: &str,
            ) -> StorageResult<Option<String>> {
                (**self).get_uuid(user, collection, token)
            }

            fn get_applications(
                &self,
                user: &str,
                collection: &str,
                since: Timestamp,
                token: &str,
            ) -> StorageResult<Vec<(Timestamp, Application)>> {
                (**self).get_applications(user, collection, since, token)
            }

            fn add_applications(
                &self,
                user: &str,
                collection: &str,
                applications: &[Application],
                token: &str,
            ) -> StorageResult<Timestamp> {
                (**self).add_applications(user, collection, applications, token)
            }

            fn delete(
                &self,
                user: &str,
                collection: &str,
                client_id: &str,
                reason: &str,
                token: &str,
            ) -> StorageResult<()> {
                (**self).delete(user, collection, client_id, reason, token)
            }
        }
    };
}

forward_engine!(Box<E>);
forward_engine!(Arc<E>);
