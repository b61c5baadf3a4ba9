//! Fault-injecting collaborators.
//!
//! [`FlakyCache`] makes a cache fail on demand; [`ScriptedDocumentStore`]
//! runs scripted actions (usually a competing write) right before a put,
//! which makes races deterministic.

use appsync_storage::docstore::{
    Document, DocumentResult, DocumentStore, DocumentStoreError, MemoryDocumentStore,
    WriteCondition,
};
use appsync_storage::{CacheClient, CacheError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A [`CacheClient`] wrapper whose calls can be switched to fail.
pub struct FlakyCache {
    inner: Arc<dyn CacheClient>,
    failing: AtomicBool,
    failures: AtomicUsize,
}

impl FlakyCache {
    /// Wraps `inner`; calls succeed until [`FlakyCache::set_failing`].
    pub fn new(inner: Arc<dyn CacheClient>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
        }
    }

    /// Makes every following call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns how many calls failed so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

impl CacheClient for FlakyCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.delete(key)
    }
}

type Action = Box<dyn FnOnce(&MemoryDocumentStore) + Send>;

/// What happens on the next put to a key.
enum Script {
    Before(Action),
    Fail(DocumentStoreError),
}

/// A [`DocumentStore`] over a [`MemoryDocumentStore`] with one-shot scripts
/// keyed by `(user, key)`.
pub struct ScriptedDocumentStore {
    inner: Arc<MemoryDocumentStore>,
    scripts: Mutex<Vec<(String, String, Script)>>,
    puts: AtomicUsize,
}

impl ScriptedDocumentStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<MemoryDocumentStore>) -> Self {
        Self {
            inner,
            scripts: Mutex::new(Vec::new()),
            puts: AtomicUsize::new(0),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<MemoryDocumentStore> {
        &self.inner
    }

    /// Runs `action` on the wrapped store just before the next put to `key`.
    pub fn before_put(
        &self,
        user: &str,
        key: &str,
        action: impl FnOnce(&MemoryDocumentStore) + Send + 'static,
    ) {
        self.scripts
            .lock()
            .push((user.to_string(), key.to_string(), Script::Before(Box::new(action))));
    }

    /// Fails the next put to `key` with `error`.
    pub fn fail_next_put(&self, user: &str, key: &str, error: DocumentStoreError) {
        self.scripts
            .lock()
            .push((user.to_string(), key.to_string(), Script::Fail(error)));
    }

    /// Returns how many puts reached the store, scripted failures included.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn take_script(&self, user: &str, key: &str) -> Option<Script> {
        let mut scripts = self.scripts.lock();
        let index = scripts.iter().position(|(u, k, _)| u == user && k == key)?;
        Some(scripts.remove(index).2)
    }
}

impl DocumentStore for ScriptedDocumentStore {
    fn get(&self, user: &str, key: &str) -> DocumentResult<Option<Document>> {
        self.inner.get(user, key)
    }

    fn put(
        &self,
        user: &str,
        key: &str,
        value: &str,
        condition: WriteCondition<'_>,
    ) -> DocumentResult<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        match self.take_script(user, key) {
            Some(Script::Before(action)) => action(&self.inner),
            Some(Script::Fail(error)) => return Err(error),
            None => {}
        }
        self.inner.put(user, key, value, condition)
    }

    fn delete(&self, user: &str, key: &str, etag: &str) -> DocumentResult<()> {
        self.inner.delete(user, key, etag)
    }
}
