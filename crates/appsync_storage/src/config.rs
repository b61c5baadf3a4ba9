//! Engine configuration.
//!
//! Every section deserializes with defaults for the fields it can default,
//! so a minimal config only names the backend:
//!
//! ```json
//! { "backend": { "kind": "relational", "path": "/var/lib/appsync/db.sqlite" },
//!   "session": { "secret": "change me" } }
//! ```
//!
//! [`EngineBuilder`] turns an [`EngineConfig`] plus the external
//! collaborators into a ready [`StorageEngine`].

use crate::auth::{AssertionVerifier, PassThroughBroker, SessionTokenBroker, TokenBroker};
use crate::cache::{CacheClient, MetadataCache};
use crate::docstore::{DocumentStore, DocumentStoreBackend};
use crate::engine::StorageEngine;
use crate::error::StorageError;
use crate::memory::MemoryBackend;
use crate::mirrored::MirroredBackend;
use crate::sql::RelationalBackend;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

fn default_prefix() -> String {
    "appsync".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// Errors raised while assembling an engine.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config needs a collaborator the builder was not given.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Authentication is enabled but no session secret is configured.
    #[error("authentication is enabled but no session secret is configured")]
    MissingSessionSecret,

    /// A field holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The backend failed to start.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Metadata cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Namespace prepended to every cache key.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Entry lifetime in seconds. Zero disables expiry.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    /// Creates a cache configuration with the given key prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ttl_secs: default_ttl_secs(),
        }
    }

    /// Sets the entry lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    /// Returns the entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(default_prefix())
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Zeroizing<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let secret = Zeroizing::new(String::deserialize(deserializer)?);
    Ok(Zeroizing::new(secret.as_bytes().to_vec()))
}

/// Session settings for the token broker.
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC key signing session tokens.
    #[serde(deserialize_with = "deserialize_secret")]
    pub secret: Zeroizing<Vec<u8>>,
    /// Session lifetime in milliseconds.
    #[serde(default = "default_session_ttl_ms")]
    pub ttl_ms: u64,
    /// Namespace prepended to every session key.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_session_ttl_ms() -> u64 {
    default_ttl_secs() * 1000
}

impl SessionConfig {
    /// Creates a session configuration signed with `secret`.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            ttl_ms: default_session_ttl_ms(),
            prefix: default_prefix(),
        }
    }

    /// Sets the session lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Sets the session key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Returns the session lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("ttl_ms", &self.ttl_ms)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Relational backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqlConfig {
    /// Database file. `None` opens a private in-memory database.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Whether to create missing tables on open.
    #[serde(default = "default_true")]
    pub create_tables: bool,
}

impl SqlConfig {
    /// An in-memory database.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            create_tables: true,
        }
    }

    /// A database stored at `path`.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            create_tables: true,
        }
    }

    /// Sets whether missing tables are created on open.
    #[must_use]
    pub fn with_create_tables(mut self, create: bool) -> Self {
        self.create_tables = create;
        self
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Which storage backend to run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// The in-process reference engine.
    Memory,
    /// SQLite tables.
    Relational(SqlConfig),
    /// The document store handed to [`EngineBuilder::document_store`].
    DocumentStore,
    /// Dual writes to two engines; reads come from `readwrite`.
    Mirrored {
        /// Engine serving reads and the first write.
        readwrite: Box<BackendConfig>,
        /// Engine receiving a copy of every write.
        write: Box<BackendConfig>,
    },
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Backend selection.
    pub backend: BackendConfig,
    /// Whether tokens are checked.
    #[serde(default = "default_true")]
    pub auth_enabled: bool,
    /// Metadata cache for the document-store backend.
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    /// Session settings; required when `auth_enabled`.
    #[serde(default)]
    pub session: Option<SessionConfig>,
}

impl EngineConfig {
    /// Creates a configuration for `backend` with authentication disabled.
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            auth_enabled: false,
            cache: None,
            session: None,
        }
    }

    /// Enables authentication with the given session settings.
    #[must_use]
    pub fn with_auth(mut self, session: SessionConfig) -> Self {
        self.auth_enabled = true;
        self.session = Some(session);
        self
    }

    /// Enables the metadata cache.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Parses a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
            field: "config",
            reason: e.to_string(),
        })
    }
}

/// Assembles a [`StorageEngine`] from an [`EngineConfig`].
///
/// # Example
///
/// ```rust
/// use appsync_storage::{BackendConfig, EngineBuilder, EngineConfig, StorageEngine};
///
/// let config = EngineConfig::new(BackendConfig::Memory);
/// let engine = EngineBuilder::new().build(&config).unwrap();
/// assert!(engine.get_uuid("u1", "apps", "any-token").unwrap().is_none());
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    document_store: Option<Arc<dyn DocumentStore>>,
    cache_client: Option<Arc<dyn CacheClient>>,
    verifier: Option<Arc<dyn AssertionVerifier>>,
}

impl EngineBuilder {
    /// Creates a builder with no collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the document store used by `document_store` backends.
    #[must_use]
    pub fn document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(store);
        self
    }

    /// Sets the cache used for metadata and sessions.
    #[must_use]
    pub fn cache_client(mut self, client: Arc<dyn CacheClient>) -> Self {
        self.cache_client = Some(client);
        self
    }

    /// Sets the identity assertion verifier.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn AssertionVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Builds the configured engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required collaborator or setting is
    /// missing, or the backend fails to open.
    pub fn build(&self, config: &EngineConfig) -> Result<Box<dyn StorageEngine>, ConfigError> {
        let broker = self.broker(config)?;
        info!(
            backend = backend_name(&config.backend),
            auth = config.auth_enabled,
            "building storage engine"
        );
        self.build_backend(&config.backend, config, broker)
    }

    fn broker(&self, config: &EngineConfig) -> Result<Arc<dyn TokenBroker>, ConfigError> {
        if !config.auth_enabled {
            return Ok(Arc::new(match &self.verifier {
                Some(verifier) => PassThroughBroker::with_verifier(verifier.clone()),
                None => PassThroughBroker::new(),
            }));
        }

        let session = config
            .session
            .clone()
            .ok_or(ConfigError::MissingSessionSecret)?;
        if session.secret.is_empty() {
            return Err(ConfigError::MissingSessionSecret);
        }
        let verifier = self
            .verifier
            .clone()
            .ok_or(ConfigError::MissingCollaborator("assertion verifier"))?;
        let sessions = self
            .cache_client
            .clone()
            .ok_or(ConfigError::MissingCollaborator("cache client"))?;
        Ok(Arc::new(SessionTokenBroker::new(verifier, sessions, session)))
    }

    fn build_backend(
        &self,
        backend: &BackendConfig,
        config: &EngineConfig,
        broker: Arc<dyn TokenBroker>,
    ) -> Result<Box<dyn StorageEngine>, ConfigError> {
        match backend {
            BackendConfig::Memory => Ok(Box::new(MemoryBackend::new(broker))),
            BackendConfig::Relational(sql) => {
                Ok(Box::new(RelationalBackend::open(sql.clone(), broker)?))
            }
            BackendConfig::DocumentStore => {
                let store = self
                    .document_store
                    .clone()
                    .ok_or(ConfigError::MissingCollaborator("document store"))?;
                let mut engine = DocumentStoreBackend::new(store, broker);
                if let Some(cache) = &config.cache {
                    let client = self
                        .cache_client
                        .clone()
                        .ok_or(ConfigError::MissingCollaborator("cache client"))?;
                    engine = engine.with_cache(MetadataCache::new(client, cache));
                }
                Ok(Box::new(engine))
            }
            BackendConfig::Mirrored { readwrite, write } => {
                if matches!(**readwrite, BackendConfig::Mirrored { .. })
                    || matches!(**write, BackendConfig::Mirrored { .. })
                {
                    return Err(ConfigError::InvalidValue {
                        field: "backend",
                        reason: "mirrored backends cannot be nested".into(),
                    });
                }
                let primary = self.build_backend(readwrite, config, broker)?;
                let secondary =
                    self.build_backend(write, config, Arc::new(PassThroughBroker::new()))?;
                Ok(Box::new(MirroredBackend::new(primary, secondary)))
            }
        }
    }
}

fn backend_name(backend: &BackendConfig) -> &'static str {
    match backend {
        BackendConfig::Memory => "memory",
        BackendConfig::Relational(_) => "relational",
        BackendConfig::DocumentStore => "document_store",
        BackendConfig::Mirrored { .. } => "mirrored",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DummyVerifier;
    use crate::cache::MemoryCache;
    use crate::docstore::MemoryDocumentStore;

    #[test]
    fn defaults_fill_in() {
        let config = EngineConfig::from_json(r#"{"backend": {"kind": "memory"}}"#).unwrap();
        assert_eq!(config.backend, BackendConfig::Memory);
        assert!(config.auth_enabled);
        assert!(config.cache.is_none());

        let cache: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cache, CacheConfig::default());
        assert_eq!(cache.prefix, "appsync");
        assert_eq!(cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn parses_nested_backends() {
        let config = EngineConfig::from_json(
            r#"{
                "backend": {
                    "kind": "mirrored",
                    "readwrite": {"kind": "document_store"},
                    "write": {"kind": "relational", "path": "/tmp/a.db", "create_tables": false}
                },
                "auth_enabled": false
            }"#,
        )
        .unwrap();
        let BackendConfig::Mirrored { readwrite, write } = config.backend else {
            panic!("expected a mirrored backend");
        };
        assert_eq!(*readwrite, BackendConfig::DocumentStore);
        assert_eq!(
            *write,
            BackendConfig::Relational(SqlConfig::at_path("/tmp/a.db").with_create_tables(false))
        );
    }

    #[test]
    fn session_secret_is_redacted() {
        let session: SessionConfig = serde_json::from_str(r#"{"secret": "hunter2"}"#).unwrap();
        assert_eq!(session.secret.as_slice(), b"hunter2");
        assert_eq!(session.ttl(), Duration::from_secs(300));
        assert!(!format!("{session:?}").contains("hunter2"));
    }

    #[test]
    fn bad_json_is_invalid_value() {
        let err = EngineConfig::from_json(r#"{"backend": {"kind": "nope"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "config", .. }));
    }

    #[test]
    fn auth_requires_secret_and_collaborators() {
        let mut config = EngineConfig::new(BackendConfig::Memory);
        config.auth_enabled = true;
        assert!(matches!(
            EngineBuilder::new().build(&config),
            Err(ConfigError::MissingSessionSecret)
        ));

        let config = config.with_auth(SessionConfig::new(b"secret".to_vec()));
        assert!(matches!(
            EngineBuilder::new().build(&config),
            Err(ConfigError::MissingCollaborator("assertion verifier"))
        ));

        let engine = EngineBuilder::new()
            .verifier(Arc::new(DummyVerifier))
            .cache_client(Arc::new(MemoryCache::new()))
            .build(&config)
            .unwrap();
        assert!(matches!(
            engine.get_uuid("u1", "apps", "faketoken"),
            Err(StorageError::Auth(_))
        ));
    }

    #[test]
    fn document_store_needs_a_store() {
        let config = EngineConfig::new(BackendConfig::DocumentStore);
        assert!(matches!(
            EngineBuilder::new().build(&config),
            Err(ConfigError::MissingCollaborator("document store"))
        ));

        let config = config.with_cache(CacheConfig::default());
        let builder = EngineBuilder::new().document_store(Arc::new(MemoryDocumentStore::new()));
        assert!(matches!(
            builder.build(&config),
            Err(ConfigError::MissingCollaborator("cache client"))
        ));
        assert!(builder
            .cache_client(Arc::new(MemoryCache::new()))
            .build(&config)
            .is_ok());
    }

    #[test]
    fn nested_mirrors_are_rejected() {
        let inner = BackendConfig::Mirrored {
            readwrite: Box::new(BackendConfig::Memory),
            write: Box::new(BackendConfig::Memory),
        };
        let config = EngineConfig::new(BackendConfig::Mirrored {
            readwrite: Box::new(inner),
            write: Box::new(BackendConfig::Memory),
        });
        assert!(matches!(
            EngineBuilder::new().build(&config),
            Err(ConfigError::InvalidValue { field: "backend", .. })
        ));
    }
}
