//! Import command implementation.

use super::{Target, ADMIN_TOKEN};
use appsync_storage::{Application, StorageEngine, Timestamp};
use std::path::Path;
use tracing::debug;

/// Parses a JSON array of records.
pub fn parse(json: &str) -> Result<Vec<Application>, Box<dyn std::error::Error>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let apps = values
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            Application::from_json(value).map_err(|e| format!("record {i}: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(apps)
}

/// Adds every record in `file` to the collection in one batch.
pub fn run(target: &Target, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let committed = import(target, &std::fs::read_to_string(file)?)?;
    println!("Imported at {committed}");
    Ok(())
}

/// Adds the records in `json` and returns the commit timestamp.
pub fn import(target: &Target, json: &str) -> Result<Timestamp, Box<dyn std::error::Error>> {
    let apps = parse(json)?;
    debug!(count = apps.len(), "importing records");
    Ok(target
        .engine
        .add_applications(&target.user, &target.collection, &apps, ADMIN_TOKEN)?)
}
