//! SQL text for the relational backend.

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT,
    user TEXT NOT NULL,
    collection TEXT NOT NULL,
    last_modified INTEGER NOT NULL DEFAULT 0,
    UNIQUE(user, collection)
);

CREATE TABLE IF NOT EXISTS applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user TEXT NOT NULL,
    collection TEXT NOT NULL,
    origin TEXT NOT NULL,
    last_modified INTEGER NOT NULL,
    data TEXT NOT NULL,
    UNIQUE(user, collection, origin)
);

CREATE INDEX IF NOT EXISTS applications_by_modified
    ON applications (user, collection, last_modified);

CREATE TABLE IF NOT EXISTS deleted (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user TEXT NOT NULL,
    collection TEXT NOT NULL,
    reason TEXT NOT NULL,
    client_id TEXT NOT NULL,
    UNIQUE(user, collection)
);
";

pub(crate) const IS_DELETED: &str =
    "SELECT client_id, reason FROM deleted WHERE user = :user AND collection = :collection";

pub(crate) const MARK_DELETED: &str = "INSERT INTO deleted (user, collection, reason, client_id) \
     VALUES (:user, :collection, :reason, :client_id)";

pub(crate) const UNMARK_DELETED: &str =
    "DELETE FROM deleted WHERE user = :user AND collection = :collection";

pub(crate) const GET_UUID: &str =
    "SELECT uuid FROM collections WHERE user = :user AND collection = :collection";

/// Stamps a write: keeps an existing uuid, assigns `:uuid` otherwise.
pub(crate) const TOUCH_COLLECTION: &str =
    "INSERT INTO collections (uuid, user, collection, last_modified) \
     VALUES (:uuid, :user, :collection, :last_modified) \
     ON CONFLICT(user, collection) DO UPDATE SET \
     uuid = COALESCE(collections.uuid, excluded.uuid), \
     last_modified = excluded.last_modified";

/// Stamps a deletion: drops the uuid, keeps the row and its timestamp.
pub(crate) const CLEAR_COLLECTION: &str =
    "INSERT INTO collections (uuid, user, collection, last_modified) \
     VALUES (NULL, :user, :collection, :last_modified) \
     ON CONFLICT(user, collection) DO UPDATE SET \
     uuid = NULL, last_modified = excluded.last_modified";

pub(crate) const LAST_MODIFIED: &str =
    "SELECT last_modified FROM collections WHERE user = :user AND collection = :collection";

pub(crate) const GET_APPLICATIONS: &str = "SELECT last_modified, data FROM applications \
     WHERE user = :user AND collection = :collection AND last_modified >= :since \
     ORDER BY last_modified, origin";

pub(crate) const FIND_APPLICATION: &str = "SELECT id FROM applications \
     WHERE user = :user AND collection = :collection AND origin = :origin";

pub(crate) const ADD_APPLICATION: &str =
    "INSERT INTO applications (user, collection, origin, last_modified, data) \
     VALUES (:user, :collection, :origin, :last_modified, :data)";

pub(crate) const UPDATE_APPLICATION: &str =
    "UPDATE applications SET last_modified = :last_modified, data = :data WHERE id = :id";

pub(crate) const DELETE_APPLICATIONS: &str =
    "DELETE FROM applications WHERE user = :user AND collection = :collection";
