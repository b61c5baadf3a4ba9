//! Delete command implementation.

use super::{Target, ADMIN_TOKEN};
use appsync_storage::StorageEngine;
use tracing::info;

/// Marks the collection deleted on behalf of `client_id`.
pub fn run(
    target: &Target,
    client_id: &str,
    reason: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    target.engine.delete(
        &target.user,
        &target.collection,
        client_id,
        reason,
        ADMIN_TOKEN,
    )?;
    info!(user = %target.user, collection = %target.collection, "marked deleted");
    println!("Deleted {}/{}", target.user, target.collection);
    Ok(())
}
