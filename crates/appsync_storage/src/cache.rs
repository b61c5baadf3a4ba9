//! Read-through cache for collection metadata.
//!
//! [`MetadataCache`] sits in front of the metadata lookup of the
//! document-store backend. The cache is best-effort:
//!
//! - **Fail-open**: a cache error is logged and treated as a miss, never
//!   surfaced to the caller
//! - **Write-through**: every committed metadata document overwrites its entry
//! - **Bounded staleness**: entries expire after the configured TTL
//!
//! The cache backend itself is a [`CacheClient`]; production deployments plug
//! in a memcached-style client, tests use [`MemoryCache`].

use crate::config::CacheConfig;
use crate::docstore::VersionedMetadata;
use crate::error::StorageResult;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{trace, warn};

/// Errors reported by a cache backend.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache server could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// The cache rejected the operation.
    #[error("cache operation failed: {0}")]
    Failed(String),
}

/// A shared key/value cache with per-entry expiry.
pub trait CacheClient: Send + Sync {
    /// Returns the value stored under `key`, if any and not expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key`. A zero `ttl` means no expiry.
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Default bound on the number of entries a [`MemoryCache`] holds.
pub const DEFAULT_CACHE_CAPACITY: u64 = 100_000;

/// A cached value and the lifetime it was stored with.
#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    ttl: Option<Duration>,
}

/// Per-entry expiry taken from the `ttl` passed to [`CacheClient::set`].
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// An in-process [`CacheClient`] backed by a [`moka::sync::Cache`].
///
/// Entries expire after the TTL they were set with and are evicted in the
/// background; the cache is also capacity-bounded with LRU eviction.
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl MemoryCache {
    /// Creates an empty cache holding at most [`DEFAULT_CACHE_CAPACITY`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Creates an empty cache holding at most `max_capacity` entries.
    #[must_use]
    pub fn with_capacity(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .build();
        Self { entries }
    }

    /// Returns the number of entries held, after evicting expired ones.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    /// Returns true if no entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheClient for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.to_vec(),
            ttl: (!ttl.is_zero()).then_some(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key);
        Ok(())
    }
}

/// Read-through cache of metadata documents keyed by `(user, collection)`.
#[derive(Clone)]
pub struct MetadataCache {
    client: Arc<dyn CacheClient>,
    prefix: String,
    ttl: Duration,
}

impl MetadataCache {
    /// Creates a metadata cache over `client`.
    pub fn new(client: Arc<dyn CacheClient>, config: &CacheConfig) -> Self {
        Self {
            client,
            prefix: config.prefix.clone(),
            ttl: config.ttl(),
        }
    }

    /// Returns the cache key for a collection's metadata.
    pub fn key(&self, user: &str, collection: &str) -> String {
        format!("{}:{}:{}:meta", self.prefix, user, collection)
    }

    /// Returns the cached metadata, or `None` on a miss or a cache failure.
    pub fn get(&self, user: &str, collection: &str) -> Option<VersionedMetadata> {
        let key = self.key(user, collection);
        let bytes = match self.client.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                trace!(%key, "metadata cache miss");
                return None;
            }
            Err(err) => {
                warn!(%key, error = %err, "unable to read metadata from the cache");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(%key, error = %err, "discarding undecodable cached metadata");
                self.invalidate(user, collection);
                None
            }
        }
    }

    /// Stores `meta` as the current metadata of a collection.
    pub fn put(&self, user: &str, collection: &str, meta: &VersionedMetadata) {
        let key = self.key(user, collection);
        let bytes = match serde_json::to_vec(meta) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%key, error = %err, "unable to encode metadata for the cache");
                return;
            }
        };
        if let Err(err) = self.client.set(&key, &bytes, self.ttl) {
            warn!(%key, error = %err, "unable to write metadata to the cache");
        }
    }

    /// Drops the cached metadata of a collection.
    pub fn invalidate(&self, user: &str, collection: &str) {
        let key = self.key(user, collection);
        if let Err(err) = self.client.delete(&key) {
            warn!(%key, error = %err, "unable to delete a cache entry");
        }
    }

    /// Returns the cached metadata, or calls `fetch` and caches what it
    /// returns. Absent documents are not cached.
    pub fn get_or_fetch<F>(
        &self,
        user: &str,
        collection: &str,
        fetch: F,
    ) -> StorageResult<Option<VersionedMetadata>>
    where
        F: FnOnce() -> StorageResult<Option<VersionedMetadata>>,
    {
        if let Some(meta) = self.get(user, collection) {
            return Ok(Some(meta));
        }
        let fetched = fetch()?;
        if let Some(meta) = &fetched {
            self.put(user, collection, meta);
        }
        Ok(fetched)
    }
}
