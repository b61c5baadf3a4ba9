//! Read-only commands.

use super::{Target, ADMIN_TOKEN};
use appsync_storage::{StorageEngine, Timestamp};
use serde::Serialize;

/// One listed record.
#[derive(Debug, Serialize)]
pub struct ListedRecord {
    /// Last-modified timestamp in seconds.
    pub last_modified: Timestamp,
    /// The record payload.
    pub record: serde_json::Value,
}

/// Prints the collection's last-modified timestamp, or `-` if never written.
pub fn last_modified(target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    match target
        .engine
        .get_last_modified(&target.user, &target.collection, ADMIN_TOKEN)?
    {
        Some(ts) => println!("{ts}"),
        None => println!("-"),
    }
    Ok(())
}

/// Prints the collection's uuid, or `-` if never written.
pub fn uuid(target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    let uuid = target
        .engine
        .get_uuid(&target.user, &target.collection, ADMIN_TOKEN)?;
    println!("{}", uuid.as_deref().unwrap_or("-"));
    Ok(())
}

/// Collects the records modified at or after `since`.
pub fn collect(
    target: &Target,
    since: Timestamp,
) -> Result<Vec<ListedRecord>, Box<dyn std::error::Error>> {
    Ok(target
        .engine
        .get_applications(&target.user, &target.collection, since, ADMIN_TOKEN)?
        .into_iter()
        .map(|(last_modified, app)| ListedRecord {
            last_modified,
            record: app.into(),
        })
        .collect())
}

/// Prints the records modified at or after `since`.
pub fn list(
    target: &Target,
    since: Timestamp,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = collect(target, since)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        "text" => {
            for listed in &records {
                let origin = listed.record["origin"].as_str().unwrap_or_default();
                println!("{}  {}", listed.last_modified, origin);
            }
            println!("{} record(s)", records.len());
        }
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}
