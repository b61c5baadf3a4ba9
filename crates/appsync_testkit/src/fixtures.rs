//! Test fixtures and engine helpers.
//!
//! Every [`TestEngine`] is built through
//! [`EngineBuilder`](appsync_storage::EngineBuilder) with authentication
//! enabled, and comes with a token for [`USER`].

use appsync_storage::docstore::{DocumentStore, MemoryDocumentStore};
use appsync_storage::{
    Application, BackendConfig, CacheClient, CacheConfig, DummyVerifier, EngineBuilder,
    EngineConfig, MemoryCache, SessionConfig, SqlConfig, StorageEngine,
};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

/// The user every fixture logs in as.
pub const USER: &str = "tarek@mozilla.com";

/// The audience fixtures verify against.
pub const AUDIENCE: &str = "https://myapps.mozillalabs.com";

/// Secret signing fixture sessions.
pub const SESSION_SECRET: &[u8] = b"appsync-testkit-session-secret";

/// Creates a record with an origin and a `name` field.
pub fn app(origin: &str, name: &str) -> Application {
    Application::new(origin).with_field("name", name)
}

/// Creates `count` records with distinct origins.
pub fn apps(prefix: &str, count: usize) -> Vec<Application> {
    (0..count)
        .map(|i| app(&format!("https://{prefix}{i}.example.com"), &format!("{prefix} {i}")))
        .collect()
}

/// Returns the origins of `apps`, sorted.
pub fn origins<'a>(apps: impl IntoIterator<Item = &'a Application>) -> Vec<String> {
    let mut origins: Vec<String> = apps.into_iter().map(|a| a.origin().to_string()).collect();
    origins.sort();
    origins
}

/// Returns the records of a read as sorted JSON values, for order-free comparison.
pub fn as_json_set<'a>(apps: impl IntoIterator<Item = &'a Application>) -> Vec<Value> {
    let mut values: Vec<Value> = apps.into_iter().map(|a| Value::from(a.clone())).collect();
    values.sort_by_key(|v| v.to_string());
    values
}

/// An engine with a logged-in user and automatic cleanup.
pub struct TestEngine {
    /// The engine under test.
    pub engine: Box<dyn StorageEngine>,
    /// Session token for [`USER`].
    pub token: String,
    /// The backing document store, for document-store engines.
    pub store: Option<Arc<MemoryDocumentStore>>,
    /// The shared cache holding sessions and metadata.
    pub cache: Arc<MemoryCache>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Builds an engine for `backend`, giving it `store` when set.
    pub fn build(
        backend: BackendConfig,
        store: Option<Arc<dyn DocumentStore>>,
        cache: Option<CacheConfig>,
    ) -> Self {
        Self::build_in(backend, store, cache, None)
    }

    fn build_in(
        backend: BackendConfig,
        store: Option<Arc<dyn DocumentStore>>,
        cache_config: Option<CacheConfig>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let cache = Arc::new(MemoryCache::new());
        let mut config =
            EngineConfig::new(backend).with_auth(SessionConfig::new(SESSION_SECRET.to_vec()));
        if let Some(cache_config) = cache_config {
            config = config.with_cache(cache_config);
        }

        let mut builder = EngineBuilder::new()
            .verifier(Arc::new(DummyVerifier))
            .cache_client(cache.clone() as Arc<dyn CacheClient>);
        if let Some(store) = store {
            builder = builder.document_store(store);
        }
        let engine = builder.build(&config).expect("Failed to build engine");

        let assertion = DummyVerifier::make_assertion(USER, AUDIENCE);
        let (_, token) = engine
            .verify(&assertion, AUDIENCE)
            .expect("Failed to log in");

        Self {
            engine,
            token,
            store: None,
            cache,
            _temp_dir: temp_dir,
        }
    }

    /// The in-memory reference engine.
    pub fn memory() -> Self {
        Self::build(BackendConfig::Memory, None, None)
    }

    /// A relational engine on an in-memory database.
    pub fn relational() -> Self {
        Self::build(BackendConfig::Relational(SqlConfig::in_memory()), None, None)
    }

    /// A relational engine on a database file in a temporary directory.
    pub fn relational_file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("appsync.db");
        Self::build_in(
            BackendConfig::Relational(SqlConfig::at_path(path)),
            None,
            None,
            Some(temp_dir),
        )
    }

    /// A document-store engine without a metadata cache.
    pub fn document_store() -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = Self::build(
            BackendConfig::DocumentStore,
            Some(store.clone() as Arc<dyn DocumentStore>),
            None,
        );
        engine.store = Some(store);
        engine
    }

    /// A document-store engine with a metadata cache.
    pub fn document_store_cached() -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = Self::build(
            BackendConfig::DocumentStore,
            Some(store.clone() as Arc<dyn DocumentStore>),
            Some(CacheConfig::new("testkit")),
        );
        engine.store = Some(store);
        engine
    }

    /// A document-store engine mirrored to a relational engine.
    pub fn mirrored() -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut engine = Self::build(
            BackendConfig::Mirrored {
                readwrite: Box::new(BackendConfig::DocumentStore),
                write: Box::new(BackendConfig::Relational(SqlConfig::in_memory())),
            },
            Some(store.clone() as Arc<dyn DocumentStore>),
            None,
        );
        engine.store = Some(store);
        engine
    }

    /// Writes `apps` to `collection` as [`USER`].
    pub fn add(&self, collection: &str, apps: &[Application]) -> appsync_storage::Timestamp {
        self.engine
            .add_applications(USER, collection, apps, &self.token)
            .expect("Failed to add applications")
    }

    /// Reads every record of `collection` as [`USER`].
    pub fn all(&self, collection: &str) -> Vec<Application> {
        self.engine
            .get_applications(USER, collection, appsync_storage::Timestamp::ZERO, &self.token)
            .expect("Failed to read applications")
            .into_iter()
            .map(|(_, app)| app)
            .collect()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = dyn StorageEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_fixture_logs_in() {
        for engine in [
            TestEngine::memory(),
            TestEngine::relational(),
            TestEngine::relational_file(),
            TestEngine::document_store(),
            TestEngine::document_store_cached(),
            TestEngine::mirrored(),
        ] {
            assert!(engine.get_uuid(USER, "apps", &engine.token).unwrap().is_none());
        }
    }

    #[test]
    fn helpers_build_distinct_records() {
        let records = apps("a", 3);
        assert_eq!(origins(&records).len(), 3);
        assert_eq!(as_json_set(&records).len(), 3);
    }
}
