//! Behaviour every storage engine must share.
//!
//! Each check takes a fresh [`TestEngine`] and panics on a violation.
//! [`run_conformance`] runs all of them.

use crate::fixtures::{app, apps, as_json_set, origins, TestEngine, AUDIENCE, USER};
use appsync_storage::{DummyVerifier, StorageError, Timestamp};

/// A named conformance check.
pub type Check = (&'static str, fn(&TestEngine));

/// Every conformance check.
pub const CHECKS: &[Check] = &[
    ("empty_collection", check_empty_collection),
    ("write_then_read", check_write_then_read),
    ("batches_union", check_batches_union),
    ("since_filter", check_since_filter),
    ("last_modified_advances", check_last_modified_advances),
    ("empty_batch", check_empty_batch),
    ("recreate_moves_forward", check_recreate_moves_forward),
    ("delete_lifecycle", check_delete_lifecycle),
    ("rejects_bad_tokens", check_rejects_bad_tokens),
    ("users_are_isolated", check_users_are_isolated),
    ("collections_are_isolated", check_collections_are_isolated),
];

/// Runs every check against a fresh engine from `make`.
pub fn run_conformance(make: impl Fn() -> TestEngine) {
    for (name, check) in CHECKS {
        eprintln!("conformance: {name}");
        check(&make());
    }
}

/// A collection nobody wrote to has no timestamp, no uuid and no records.
pub fn check_empty_collection(engine: &TestEngine) {
    assert_eq!(engine.get_last_modified(USER, "apps", &engine.token).unwrap(), None);
    assert_eq!(engine.get_uuid(USER, "apps", &engine.token).unwrap(), None);
    assert!(engine.all("apps").is_empty());
}

/// A batch is readable back with its commit timestamp.
pub fn check_write_then_read(engine: &TestEngine) {
    let batch = apps("write", 2);
    let committed = engine.add("apps", &batch);

    let read = engine
        .get_applications(USER, "apps", Timestamp::ZERO, &engine.token)
        .unwrap();
    assert_eq!(
        as_json_set(read.iter().map(|(_, app)| app)),
        as_json_set(&batch)
    );
    assert!(read.iter().all(|(modified, _)| *modified == committed));
    assert_eq!(
        engine.get_last_modified(USER, "apps", &engine.token).unwrap(),
        Some(committed)
    );
    assert!(engine.get_uuid(USER, "apps", &engine.token).unwrap().is_some());
}

/// Reading everything returns the latest version of every origin ever written.
pub fn check_batches_union(engine: &TestEngine) {
    let first = engine.add(
        "apps",
        &[app("https://a.example", "a1"), app("https://b.example", "b1")],
    );
    let second = engine.add(
        "apps",
        &[app("https://b.example", "b2"), app("https://c.example", "c1")],
    );
    assert!(second > first);

    assert_eq!(
        as_json_set(&engine.all("apps")),
        as_json_set(&[
            app("https://a.example", "a1"),
            app("https://b.example", "b2"),
            app("https://c.example", "c1"),
        ])
    );
    assert_eq!(
        engine.get_last_modified(USER, "apps", &engine.token).unwrap(),
        Some(second)
    );
}

/// `since` selects at least the records written after it, and nothing older
/// than it.
pub fn check_since_filter(engine: &TestEngine) {
    let first = engine.add("apps", &apps("old", 2));
    let newer = apps("new", 2);
    let second = engine.add("apps", &newer);

    let read = engine
        .get_applications(USER, "apps", first, &engine.token)
        .unwrap();
    assert!(read.iter().all(|(modified, _)| *modified >= first));
    let read_origins = origins(read.iter().map(|(_, app)| app));
    for origin in origins(&newer) {
        assert!(read_origins.contains(&origin), "missing {origin}");
    }

    let future = Timestamp::from_centis(second.as_centis() + 1);
    assert!(engine
        .get_applications(USER, "apps", future, &engine.token)
        .unwrap()
        .is_empty());
}

/// Every commit is strictly later than the one before.
pub fn check_last_modified_advances(engine: &TestEngine) {
    let mut previous = Timestamp::ZERO;
    for i in 0..5 {
        let committed = engine.add("apps", &[app("https://a.example", &i.to_string())]);
        assert!(committed > previous);
        previous = committed;
    }
}

/// An empty batch still commits: it stamps the collection and gives it a uuid.
pub fn check_empty_batch(engine: &TestEngine) {
    let committed = engine.add("apps", &[]);
    assert_eq!(
        engine.get_last_modified(USER, "apps", &engine.token).unwrap(),
        Some(committed)
    );
    assert!(engine.get_uuid(USER, "apps", &engine.token).unwrap().is_some());
    assert!(engine.all("apps").is_empty());

    let next = engine.add("apps", &[]);
    assert!(next > committed);
}

/// Recreating a deleted collection commits later than anything before the delete.
pub fn check_recreate_moves_forward(engine: &TestEngine) {
    let before = engine.add("apps", &[app("https://a.example", "1")]);
    engine.delete(USER, "apps", "c1", "r", &engine.token).unwrap();
    let recreated = engine.add("apps", &[app("https://a.example", "1")]);
    assert!(recreated > before);
    assert_eq!(
        engine.get_last_modified(USER, "apps", &engine.token).unwrap(),
        Some(recreated)
    );
}

/// Delete blocks every read until the next write recreates the collection
/// under a new uuid.
pub fn check_delete_lifecycle(engine: &TestEngine) {
    engine.add("blah", &[app("app1", "1"), app("app2", "2")]);
    assert_eq!(origins(&engine.all("blah")), vec!["app1", "app2"]);
    let uuid = engine.get_uuid(USER, "blah", &engine.token).unwrap();

    engine.delete(USER, "blah", "c1", "r", &engine.token).unwrap();
    let is_c1 = |result: Result<(), StorageError>| match result {
        Err(StorageError::CollectionDeleted { client_id, reason }) => {
            client_id == "c1" && reason == "r"
        }
        _ => false,
    };
    assert!(is_c1(engine.get_uuid(USER, "blah", &engine.token).map(|_| ())));
    assert!(is_c1(
        engine.get_last_modified(USER, "blah", &engine.token).map(|_| ())
    ));
    assert!(is_c1(
        engine
            .get_applications(USER, "blah", Timestamp::ZERO, &engine.token)
            .map(|_| ())
    ));

    // A second delete keeps the first client id and reason.
    engine.delete(USER, "blah", "c2", "again", &engine.token).unwrap();
    assert!(is_c1(engine.get_uuid(USER, "blah", &engine.token).map(|_| ())));

    engine.add("blah", &[app("app1", "1")]);
    assert_eq!(origins(&engine.all("blah")), vec!["app1"]);
    let recreated = engine.get_uuid(USER, "blah", &engine.token).unwrap();
    assert!(recreated.is_some());
    assert_ne!(recreated, uuid);
}

/// Calls with a bad token, or another user's token, fail before touching storage.
pub fn check_rejects_bad_tokens(engine: &TestEngine) {
    let is_auth = |result: Result<(), StorageError>| matches!(result, Err(StorageError::Auth(_)));

    assert!(is_auth(engine.get_uuid(USER, "apps", "faketoken").map(|_| ())));
    assert!(is_auth(
        engine
            .add_applications(USER, "apps", &[app("a", "a")], "faketoken")
            .map(|_| ())
    ));
    assert!(is_auth(engine.delete(USER, "apps", "c1", "r", "faketoken")));
    assert!(is_auth(
        engine
            .get_last_modified("someone@else.com", "apps", &engine.token)
            .map(|_| ())
    ));
    assert!(engine.all("apps").is_empty());

    assert!(matches!(
        engine.verify("not an assertion", AUDIENCE),
        Err(StorageError::Auth(_))
    ));
}

/// One user's writes and deletes are invisible to another.
pub fn check_users_are_isolated(engine: &TestEngine) {
    let other = "other@example.com";
    let (_, other_token) = engine
        .verify(&DummyVerifier::make_assertion(other, AUDIENCE), AUDIENCE)
        .unwrap();

    engine.add("apps", &[app("https://mine.example", "mine")]);
    engine
        .add_applications(other, "apps", &[app("https://theirs.example", "theirs")], &other_token)
        .unwrap();
    engine.delete(other, "apps", "c1", "r", &other_token).unwrap();

    assert_eq!(origins(&engine.all("apps")), vec!["https://mine.example"]);
}

/// Collections of one user do not share records or deletion state.
pub fn check_collections_are_isolated(engine: &TestEngine) {
    engine.add("one", &[app("https://a.example", "a")]);
    engine.add("two", &[app("https://b.example", "b")]);
    engine.delete(USER, "two", "c1", "r", &engine.token).unwrap();

    assert_eq!(origins(&engine.all("one")), vec!["https://a.example"]);
    assert_ne!(
        engine.get_uuid(USER, "one", &engine.token).unwrap(),
        None
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_engine_conforms() {
        run_conformance(TestEngine::memory);
    }
}
