//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records and batches that are valid
//! input for every engine.

use appsync_storage::{Application, Timestamp};
use proptest::prelude::*;

/// Strategy for generating origins.
pub fn origin_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("https://[a-z]{1,8}\\.example\\.(com|org)")
        .expect("Invalid regex")
}

/// Strategy for generating a record with a few payload fields.
pub fn application_strategy() -> impl Strategy<Value = Application> {
    (
        origin_strategy(),
        prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4),
    )
        .prop_map(|(origin, fields)| {
            fields
                .into_iter()
                .fold(Application::new(origin), |app, (key, value)| {
                    app.with_field(key, value)
                })
        })
}

/// Strategy for generating a batch whose origins are drawn from a small pool,
/// so that batches overwrite each other's records.
pub fn batch_strategy() -> impl Strategy<Value = Vec<Application>> {
    prop::collection::vec(
        (0u8..6, any::<u16>()).prop_map(|(slot, version)| {
            Application::new(format!("https://app{slot}.example.com"))
                .with_field("version", version)
        }),
        1..5,
    )
}

/// Strategy for generating a sequence of batches.
pub fn batches_strategy() -> impl Strategy<Value = Vec<Vec<Application>>> {
    prop::collection::vec(batch_strategy(), 1..5)
}

/// Strategy for generating timestamps between 2001 and 2286.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (100_000_000_000i64..1_000_000_000_000i64).prop_map(Timestamp::from_centis)
}

/// Returns the latest version of each origin after applying `batches` in order.
///
/// Within a batch a later record wins over an earlier one with the same origin.
pub fn expected_union(batches: &[Vec<Application>]) -> Vec<Application> {
    let mut latest = std::collections::BTreeMap::new();
    for app in batches.iter().flatten() {
        latest.insert(app.origin().to_string(), app.clone());
    }
    latest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_records_have_their_origin(app in application_strategy()) {
            prop_assert!(app.origin().starts_with("https://"));
            prop_assert_eq!(app.get("origin").and_then(|v| v.as_str()), Some(app.origin()));
        }

        #[test]
        fn union_has_one_record_per_origin(batches in batches_strategy()) {
            let union = expected_union(&batches);
            let mut origins: Vec<_> = union.iter().map(|a| a.origin()).collect();
            origins.dedup();
            prop_assert_eq!(origins.len(), union.len());
        }
    }
}
