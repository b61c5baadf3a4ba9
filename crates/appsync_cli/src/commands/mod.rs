//! CLI command implementations.

pub mod delete;
pub mod import;
pub mod read;

use appsync_storage::{PassThroughBroker, RelationalBackend, SqlConfig, StorageResult};
use std::path::Path;
use std::sync::Arc;

/// Token presented to the engine; the CLI runs without authentication.
pub const ADMIN_TOKEN: &str = "appsync-admin";

/// The collection a command operates on.
pub struct Target {
    /// Engine over the database file.
    pub engine: RelationalBackend,
    /// Owning user.
    pub user: String,
    /// Collection name.
    pub collection: String,
}

impl Target {
    /// Opens the database at `path` without creating missing tables.
    pub fn open(path: &Path, user: &str, collection: &str) -> StorageResult<Self> {
        let engine = RelationalBackend::open(
            SqlConfig::at_path(path).with_create_tables(false),
            Arc::new(PassThroughBroker::new()),
        )?;
        Ok(Self::new(engine, user, collection))
    }

    /// Wraps an already opened engine.
    pub fn new(engine: RelationalBackend, user: &str, collection: &str) -> Self {
        Self {
            engine,
            user: user.to_string(),
            collection: collection.to_string(),
        }
    }
}
