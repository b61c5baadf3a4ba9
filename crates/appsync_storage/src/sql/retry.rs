//! Retry-once policy for transient database failures.

use crate::error::{StorageError, StorageResult};
use rusqlite::ErrorCode;
use tracing::{error, warn};

/// MySQL's "lost connection during query" code, as carried in driver messages.
const LOST_CONNECTION: &str = "2013";

/// Returns true if `err` means the connection went away rather than the
/// statement being wrong.
pub(crate) fn is_connection_lost(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
            ) || message
                .as_deref()
                .is_some_and(|m| m.contains(LOST_CONNECTION))
        }
        _ => false,
    }
}

/// Runs `attempt`, retrying exactly once if the first failure is transient.
///
/// The closure receives the attempt number (0 or 1) so the caller can
/// reconnect before the retry.
pub(crate) fn with_retry<T, F>(operation: &str, mut attempt: F) -> StorageResult<T>
where
    F: FnMut(u32) -> rusqlite::Result<T>,
{
    let first = match attempt(0) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    if !is_connection_lost(&first) {
        error!(%operation, error = %first, "database error");
        return Err(StorageError::Server(format!("{operation}: {first}")));
    }

    warn!(%operation, error = %first, "lost the database connection, retrying once");
    attempt(1).map_err(|err| {
        error!(%operation, error = %err, "database retry failed");
        if is_connection_lost(&err) {
            StorageError::Connection(format!("{operation}: {err}"))
        } else {
            StorageError::Server(format!("{operation}: {err}"))
        }
    })
}
