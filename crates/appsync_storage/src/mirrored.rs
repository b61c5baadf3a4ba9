//! Dual-write engine for migrating between backends.

use crate::application::Application;
use crate::engine::StorageEngine;
use crate::error::StorageResult;
use crate::timestamp::Timestamp;
use tracing::{debug, warn};

/// A [`StorageEngine`] that serves reads from one engine and writes to two.
///
/// Writes hit `readwrite` first. If it fails, `write` is left untouched so
/// that the caller's retry replays the whole batch on both sides. The
/// caller always sees `readwrite`'s result.
pub struct MirroredBackend {
    readwrite: Box<dyn StorageEngine>,
    write: Box<dyn StorageEngine>,
}

impl MirroredBackend {
    /// Mirrors writes on `readwrite` to `write`.
    ///
    /// `write` receives tokens issued by `readwrite`, so it should be built
    /// with a [`PassThroughBroker`](crate::PassThroughBroker).
    pub fn new(readwrite: Box<dyn StorageEngine>, write: Box<dyn StorageEngine>) -> Self {
        Self { readwrite, write }
    }
}

impl StorageEngine for MirroredBackend {
    fn verify(&self, assertion: &str, audience: &str) -> StorageResult<(String, String)> {
        self.readwrite.verify(assertion, audience)
    }

    fn get_last_modified(
        &self,
        user: &str,
        collection: &str,
        token: &str,
    ) -> StorageResult<Option<Timestamp>> {
        self.readwrite.get_last_modified(user, collection, token)
    }

    fn get_uuid(&self, user: &str, collection: &str, token: &str) -> StorageResult<Option<String>> {
        self.readwrite.get_uuid(user, collection, token)
    }

    fn get_applications(
        &self,
        user: &str,
        collection: &str,
        since: Timestamp,
        token: &str,
    ) -> StorageResult<Vec<(Timestamp, Application)>> {
        self.readwrite
            .get_applications(user, collection, since, token)
    }

    fn add_applications(
        &self,
        user: &str,
        collection: &str,
        applications: &[Application],
        token: &str,
    ) -> StorageResult<Timestamp> {
        let committed = self
            .readwrite
            .add_applications(user, collection, applications, token)
            .inspect_err(|err| {
                debug!(%user, %collection, error = %err, "primary write failed, not mirroring")
            })?;
        self.write
            .add_applications(user, collection, applications, token)
            .inspect_err(|err| warn!(%user, %collection, error = %err, "mirrored write failed"))?;
        Ok(committed)
    }

    fn delete(
        &self,
        user: &str,
        collection: &str,
        client_id: &str,
        reason: &str,
        token: &str,
    ) -> StorageResult<()> {
        self.readwrite
            .delete(user, collection, client_id, reason, token)?;
        self.write
            .delete(user, collection, client_id, reason, token)
            .inspect_err(|err| warn!(%user, %collection, error = %err, "mirrored delete failed"))
    }
}
