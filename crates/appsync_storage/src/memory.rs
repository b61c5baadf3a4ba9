//! In-memory storage engine.
//!
//! Primarily for tests and single-process deployments; state lives as long
//! as the engine value.

use crate::application::Application;
use crate::auth::TokenBroker;
use crate::engine::StorageEngine;
use crate::error::{StorageError, StorageResult};
use crate::timestamp::Timestamp;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default)]
struct CollectionState {
    apps: HashMap<String, (Timestamp, Application)>,
    uuid: Option<String>,
    last_modified: Option<Timestamp>,
    deleted: Option<(String, String)>,
}

impl CollectionState {
    fn ensure_live(&self) -> StorageResult<()> {
        match &self.deleted {
            Some((client_id, reason)) => Err(StorageError::deleted(client_id, reason)),
            None => Ok(()),
        }
    }
}

/// A [`StorageEngine`] keeping every collection in process memory.
///
/// Writes are last-write-wins per origin and never conflict.
pub struct MemoryBackend {
    collections: RwLock<HashMap<(String, String), CollectionState>>,
    broker: Arc<dyn TokenBroker>,
}

impl MemoryBackend {
    /// Creates an empty engine.
    pub fn new(broker: Arc<dyn TokenBroker>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            broker,
        }
    }

    /// Runs `f` on a live collection, or returns `None` if it was never written.
    fn read<T>(
        &self,
        user: &str,
        collection: &str,
        f: impl FnOnce(&CollectionState) -> T,
    ) -> StorageResult<Option<T>> {
        let collections = self.collections.read();
        match collections.get(&(user.to_string(), collection.to_string())) {
            Some(state) => {
                state.ensure_live()?;
                Ok(Some(f(state)))
            }
            None => Ok(None),
        }
    }
}

impl StorageEngine for MemoryBackend {
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
            .read(user, collection, |state| state.last_modified)?
            .flatten())
    }

    fn get_uuid(&self, user: &str, collection: &str, token: &str) -> StorageResult<Option<String>> {
        self.broker.authorize(user, token)?;
        Ok(self
            .read(user, collection, |state| state.uuid.clone())?
            .flatten())
    }

    fn get_applications(
        &self,
        user: &str,
        collection: &str,
        since: Timestamp,
        token: &str,
    ) -> StorageResult<Vec<(Timestamp, Application)>> {
        self.broker.authorize(user, token)?;
        let apps = self.read(user, collection, |state| {
            let mut apps: Vec<_> = state
                .apps
                .values()
                .filter(|(modified, _)| *modified > since)
                .cloned()
                .collect();
            apps.sort_by(|(a, x), (b, y)| a.cmp(b).then_with(|| x.origin().cmp(y.origin())));
            apps
        })?;
        Ok(apps.unwrap_or_default())
    }

    fn add_applications(
        &self,
        user: &str,
        collection: &str,
        applications: &[Application],
        token: &str,
    ) -> StorageResult<Timestamp> {
        self.broker.authorize(user, token)?;
        let mut collections = self.collections.write();
        let state = collections
            .entry((user.to_string(), collection.to_string()))
            .or_default();

        state.deleted = None;
        if state.uuid.is_none() {
            state.uuid = Some(uuid::Uuid::new_v4().simple().to_string());
        }
        let now = Timestamp::now().after(state.last_modified.unwrap_or(Timestamp::ZERO));
        for app in applications {
            state
                .apps
                .insert(app.origin().to_string(), (now, app.clone()));
        }
        state.last_modified = Some(now);
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
        let mut collections = self.collections.write();
        let state = collections
            .entry((user.to_string(), collection.to_string()))
            .or_default();
        if state.deleted.is_some() {
            return Ok(());
        }

        state.apps.clear();
        state.uuid = None;
        state.last_modified =
            Some(Timestamp::now().after(state.last_modified.unwrap_or(Timestamp::ZERO)));
        state.deleted = Some((client_id.to_string(), reason.to_string()));
        info!(%user, %collection, %client_id, "collection deleted");
        Ok(())
    }
}
