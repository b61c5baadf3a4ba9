//! Relational backend over SQLite.
//!
//! Three tables hold the state: `applications` (one row per origin),
//! `collections` (the uuid and the collection's last-modified time) and
//! `deleted` (deletion markers). The `collections` row outlives a deletion
//! with its uuid cleared, so the timestamp keeps advancing across
//! delete/recreate cycles. Timestamps are stored as integer hundredths of a
//! second. Writes are last-write-wins.

mod queries;
mod retry;

use crate::application::Application;
use crate::auth::TokenBroker;
use crate::config::SqlConfig;
use crate::engine::StorageEngine;
use crate::error::{StorageError, StorageResult};
use crate::timestamp::Timestamp;
use parking_lot::Mutex;
use rusqlite::{named_params, Connection, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Deletion marker found inside a database call.
struct Deleted {
    client_id: String,
    reason: String,
}

impl From<Deleted> for StorageError {
    fn from(deleted: Deleted) -> Self {
        StorageError::deleted(deleted.client_id, deleted.reason)
    }
}

fn deletion(conn: &Connection, user: &str, collection: &str) -> rusqlite::Result<Option<Deleted>> {
    conn.query_row(
        queries::IS_DELETED,
        named_params! { ":user": user, ":collection": collection },
        |row| {
            Ok(Deleted {
                client_id: row.get(0)?,
                reason: row.get(1)?,
            })
        },
    )
    .optional()
}

fn last_modified(conn: &Connection, user: &str, collection: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        queries::LAST_MODIFIED,
        named_params! { ":user": user, ":collection": collection },
        |row| row.get(0),
    )
    .optional()
}

/// A [`StorageEngine`] backed by SQLite.
///
/// Every call runs under the retry-once policy: a transient failure
/// (busy, locked, I/O, lost connection) reopens a file-backed connection and
/// runs the call again; a second failure surfaces as
/// [`StorageError::Connection`].
pub struct RelationalBackend {
    conn: Mutex<Connection>,
    config: SqlConfig,
    broker: Arc<dyn TokenBroker>,
}

impl RelationalBackend {
    /// Opens the database described by `config`.
    pub fn open(config: SqlConfig, broker: Arc<dyn TokenBroker>) -> StorageResult<Self> {
        let conn = retry::with_retry("open", |_| Self::connect(&config))?;
        info!(path = ?config.path, "relational backend opened");
        Ok(Self {
            conn: Mutex::new(conn),
            config,
            broker,
        })
    }

    fn connect(config: &SqlConfig) -> rusqlite::Result<Connection> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if config.create_tables {
            conn.execute_batch(queries::SCHEMA)?;
        }
        Ok(conn)
    }

    /// Runs `body` on the connection under the retry policy.
    fn execute<T, F>(&self, operation: &str, mut body: F) -> StorageResult<T>
    where
        F: FnMut(&mut Connection) -> rusqlite::Result<T>,
    {
        retry::with_retry(operation, |attempt| {
            let mut conn = self.conn.lock();
            // An in-memory database cannot be reopened without losing it.
            if attempt > 0 && self.config.path.is_some() {
                debug!(%operation, "reopening the database connection");
                *conn = Self::connect(&self.config)?;
            }
            body(&mut conn)
        })
    }
}

impl StorageEngine for RelationalBackend {
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
        let stored = self.execute("get_last_modified", |conn| {
            if let Some(deleted) = deletion(conn, user, collection)? {
                return Ok(Err(deleted));
            }
            last_modified(conn, user, collection).map(Ok)
        })??;
        Ok(stored.map(Timestamp::from_centis))
    }

    fn get_uuid(&self, user: &str, collection: &str, token: &str) -> StorageResult<Option<String>> {
        self.broker.authorize(user, token)?;
        Ok(self.execute("get_uuid", |conn| {
            if let Some(deleted) = deletion(conn, user, collection)? {
                return Ok(Err(deleted));
            }
            conn.query_row(
                queries::GET_UUID,
                named_params! { ":user": user, ":collection": collection },
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(|uuid| Ok(uuid.flatten()))
        })??)
    }

    fn get_applications(
        &self,
        user: &str,
        collection: &str,
        since: Timestamp,
        token: &str,
    ) -> StorageResult<Vec<(Timestamp, Application)>> {
        self.broker.authorize(user, token)?;
        let rows = self.execute("get_applications", |conn| {
            if let Some(deleted) = deletion(conn, user, collection)? {
                return Ok(Err(deleted));
            }
            let mut stmt = conn.prepare_cached(queries::GET_APPLICATIONS)?;
            let rows = stmt
                .query_map(
                    named_params! {
                        ":user": user,
                        ":collection": collection,
                        ":since": since.as_centis(),
                    },
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Ok(rows))
        })??;

        rows.into_iter()
            .map(|(modified, data)| {
                Ok((Timestamp::from_centis(modified), Application::from_json_str(&data)?))
            })
            .collect()
    }

    fn add_applications(
        &self,
        user: &str,
        collection: &str,
        applications: &[Application],
        token: &str,
    ) -> StorageResult<Timestamp> {
        self.broker.authorize(user, token)?;
        let records = applications
            .iter()
            .map(|app| Ok((app.origin(), app.to_json_string()?)))
            .collect::<StorageResult<Vec<_>>>()?;

        self.execute("add_applications", |conn| {
            let tx = conn.transaction()?;
            let scope = named_params! { ":user": user, ":collection": collection };
            tx.execute(queries::UNMARK_DELETED, scope)?;

            let stored = last_modified(&tx, user, collection)?
                .map_or(Timestamp::ZERO, Timestamp::from_centis);
            let now = Timestamp::now().after(stored);
            tx.execute(
                queries::TOUCH_COLLECTION,
                named_params! {
                    ":uuid": uuid::Uuid::new_v4().simple().to_string(),
                    ":user": user,
                    ":collection": collection,
                    ":last_modified": now.as_centis(),
                },
            )?;

            for (origin, data) in &records {
                let existing: Option<i64> = tx
                    .query_row(
                        queries::FIND_APPLICATION,
                        named_params! {
                            ":user": user,
                            ":collection": collection,
                            ":origin": origin,
                        },
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(id) => tx.execute(
                        queries::UPDATE_APPLICATION,
                        named_params! {
                            ":last_modified": now.as_centis(),
                            ":data": data,
                            ":id": id,
                        },
                    )?,
                    None => tx.execute(
                        queries::ADD_APPLICATION,
                        named_params! {
                            ":user": user,
                            ":collection": collection,
                            ":origin": origin,
                            ":last_modified": now.as_centis(),
                            ":data": data,
                        },
                    )?,
                };
            }

            tx.commit()?;
            Ok(now)
        })
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
        let deleted = self.execute("delete", |conn| {
            let tx = conn.transaction()?;
            if deletion(&tx, user, collection)?.is_some() {
                return Ok(false);
            }
            let stored = last_modified(&tx, user, collection)?
                .map_or(Timestamp::ZERO, Timestamp::from_centis);
            let now = Timestamp::now().after(stored);
            let scope = named_params! { ":user": user, ":collection": collection };
            tx.execute(queries::DELETE_APPLICATIONS, scope)?;
            tx.execute(
                queries::CLEAR_COLLECTION,
                named_params! {
                    ":user": user,
                    ":collection": collection,
                    ":last_modified": now.as_centis(),
                },
            )?;
            tx.execute(
                queries::MARK_DELETED,
                named_params! {
                    ":user": user,
                    ":collection": collection,
                    ":reason": reason,
                    ":client_id": client_id,
                },
            )?;
            tx.commit()?;
            Ok(true)
        })?;
        if deleted {
            info!(%user, %collection, %client_id, "collection deleted");
        }
        Ok(())
    }
}
