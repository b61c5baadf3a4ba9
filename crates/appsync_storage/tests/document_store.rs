//! Integration tests for the document-store engine's conflict protocol.

use appsync_storage::docstore::{
    DocumentStore, DocumentStoreBackend, DocumentStoreError, MemoryDocumentStore, MetadataDocument,
    WriteCondition,
};
use appsync_storage::{
    Application, PassThroughBroker, StorageEngine, StorageError, Timestamp,
};
use appsync_testkit::{
    app, as_json_set, batches_strategy, expected_union, ScriptedDocumentStore,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

const USER: &str = "u1";
const TOKEN: &str = "token";

fn scripted() -> (Arc<ScriptedDocumentStore>, DocumentStoreBackend) {
    let store = Arc::new(ScriptedDocumentStore::new(Arc::new(MemoryDocumentStore::new())));
    let engine = DocumentStoreBackend::new(store.clone(), Arc::new(PassThroughBroker::new()));
    (store, engine)
}

fn metadata(store: &MemoryDocumentStore, collection: &str) -> MetadataDocument {
    let doc = store
        .get(USER, &format!("{collection}::meta"))
        .unwrap()
        .unwrap();
    MetadataDocument::from_json(&doc.value).unwrap()
}

fn read_all(engine: &dyn StorageEngine, collection: &str) -> Vec<Application> {
    engine
        .get_applications(USER, collection, Timestamp::ZERO, TOKEN)
        .unwrap()
        .into_iter()
        .map(|(_, app)| app)
        .collect()
}

#[test]
fn racing_create_reports_conflict_and_keeps_index() {
    let (store, engine) = scripted();
    let key = "apps::item::https://a.example";

    // Another writer creates the record between our read and our write.
    store.before_put(USER, key, move |inner| {
        inner
            .put(
                USER,
                key,
                &app("https://a.example", "theirs").to_json_string().unwrap(),
                WriteCondition::Absent,
            )
            .unwrap();
    });

    let err = engine
        .add_applications(USER, "apps", &[app("https://a.example", "mine")], TOKEN)
        .unwrap_err();
    assert!(matches!(err, StorageError::EditConflict));

    // The metadata still committed, lists the origin and adopted the winner's etag.
    let meta = metadata(store.inner(), "apps");
    assert!(meta.apps.iter().any(|(_, origin)| origin == "https://a.example"));
    let current = store.inner().get(USER, key).unwrap().unwrap();
    assert_eq!(meta.etags.get("https://a.example"), Some(&current.etag));

    assert_eq!(read_all(&engine, "apps"), vec![app("https://a.example", "theirs")]);
}

#[test]
fn conflict_does_not_roll_back_other_records() {
    let (store, engine) = scripted();
    let key = "apps::item::https://b.example";
    store.before_put(USER, key, move |inner| {
        inner
            .put(USER, key, r#"{"origin": "https://b.example"}"#, WriteCondition::Absent)
            .unwrap();
    });

    let batch = [app("https://a.example", "a"), app("https://b.example", "b")];
    assert!(matches!(
        engine.add_applications(USER, "apps", &batch, TOKEN),
        Err(StorageError::EditConflict)
    ));

    let read = read_all(&engine, "apps");
    assert!(read.contains(&app("https://a.example", "a")));
    assert_eq!(read.len(), 2);

    // Retrying the whole batch now succeeds.
    engine.add_applications(USER, "apps", &batch, TOKEN).unwrap();
    assert_eq!(as_json_set(&read_all(&engine, "apps")), as_json_set(&batch));
}

#[test]
fn record_deleted_under_the_batch_is_a_conflict() {
    let (store, engine) = scripted();
    engine
        .add_applications(USER, "apps", &[app("https://a.example", "1")], TOKEN)
        .unwrap();

    let key = "apps::item::https://a.example";
    store.before_put(USER, key, move |inner| {
        let current = inner.get(USER, key).unwrap().unwrap();
        inner.delete(USER, key, &current.etag).unwrap();
    });
    assert!(matches!(
        engine.add_applications(USER, "apps", &[app("https://a.example", "2")], TOKEN),
        Err(StorageError::EditConflict)
    ));
    assert!(!metadata(store.inner(), "apps").etags.contains_key("https://a.example"));

    // With the etag cleared the retry recreates the record.
    engine
        .add_applications(USER, "apps", &[app("https://a.example", "2")], TOKEN)
        .unwrap();
    assert_eq!(read_all(&engine, "apps"), vec![app("https://a.example", "2")]);
}

#[test]
fn metadata_race_fails_the_batch() {
    let (store, engine) = scripted();
    engine
        .add_applications(USER, "apps", &[app("https://a.example", "1")], TOKEN)
        .unwrap();

    store.before_put(USER, "apps::meta", |inner| {
        let current = inner.get(USER, "apps::meta").unwrap().unwrap();
        inner
            .put(USER, "apps::meta", &current.value, WriteCondition::Matches(&current.etag))
            .unwrap();
    });
    assert!(matches!(
        engine.add_applications(USER, "apps", &[app("https://b.example", "1")], TOKEN),
        Err(StorageError::EditConflict)
    ));
}

#[test]
fn store_errors_are_translated() {
    let (store, engine) = scripted();
    store.fail_next_put(
        USER,
        "apps::item::https://a.example",
        DocumentStoreError::Connection("reset by peer".into()),
    );
    assert!(matches!(
        engine.add_applications(USER, "apps", &[app("https://a.example", "1")], TOKEN),
        Err(StorageError::Connection(_))
    ));

    store.fail_next_put(USER, "apps::meta", DocumentStoreError::Unauthorized("no".into()));
    assert!(matches!(
        engine.add_applications(USER, "apps", &[app("https://a.example", "1")], TOKEN),
        Err(StorageError::Auth(_))
    ));
}

#[test]
fn delete_skips_records_changed_since() {
    let (store, engine) = scripted();
    engine
        .add_applications(
            USER,
            "apps",
            &[app("https://a.example", "1"), app("https://b.example", "1")],
            TOKEN,
        )
        .unwrap();

    // Someone rewrites one record after our metadata was committed.
    let key = "apps::item::https://b.example";
    let current = store.inner().get(USER, key).unwrap().unwrap();
    store
        .inner()
        .put(
            USER,
            key,
            r#"{"origin": "https://b.example"}"#,
            WriteCondition::Matches(&current.etag),
        )
        .unwrap();

    engine.delete(USER, "apps", "c1", "r", TOKEN).unwrap();
    assert_eq!(
        store.inner().keys(USER),
        vec!["apps::item::https://b.example".to_string(), "apps::meta".to_string()]
    );
    assert!(metadata(store.inner(), "apps").deleted);
}

#[test]
fn missing_records_are_skipped_on_read() {
    let (store, engine) = scripted();
    engine
        .add_applications(
            USER,
            "apps",
            &[app("https://a.example", "1"), app("https://b.example", "1")],
            TOKEN,
        )
        .unwrap();
    let key = "apps::item::https://a.example";
    let current = store.inner().get(USER, key).unwrap().unwrap();
    store.inner().delete(USER, key, &current.etag).unwrap();

    assert_eq!(read_all(&engine, "apps"), vec![app("https://b.example", "1")]);
}

#[test]
fn clock_skew_still_advances_last_modified() {
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = DocumentStoreBackend::new(store.clone(), Arc::new(PassThroughBroker::new()));

    // Metadata written by a writer whose clock runs a day ahead.
    let ahead = Timestamp::from_centis(Timestamp::now().as_centis() + 86_400 * 100);
    let mut meta = MetadataDocument::default();
    meta.touch("https://a.example", ahead);
    meta.finish_write(ahead);
    store
        .put(USER, "apps::meta", &meta.to_json().unwrap(), WriteCondition::Absent)
        .unwrap();

    let committed = engine
        .add_applications(USER, "apps", &[app("https://b.example", "1")], TOKEN)
        .unwrap();
    assert_eq!(committed, ahead.after(ahead));
    assert!(committed > ahead);
}

#[test]
fn concurrent_writers_converge() {
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = Arc::new(DocumentStoreBackend::new(
        store.clone(),
        Arc::new(PassThroughBroker::new()),
    ));

    let writers: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let engine = engine.clone();
            thread::spawn(move || {
                let record = app("https://shared.example", name);
                // Retry conflicts the way a client would.
                for _ in 0..20 {
                    match engine.add_applications(USER, "apps", &[record.clone()], TOKEN) {
                        Ok(_) => return,
                        Err(StorageError::EditConflict) => continue,
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let read = read_all(engine.as_ref(), "apps");
    assert_eq!(read.len(), 1);
    assert!(
        read[0] == app("https://shared.example", "left")
            || read[0] == app("https://shared.example", "right")
    );
    assert!(metadata(&store, "apps")
        .apps
        .iter()
        .any(|(_, origin)| origin == "https://shared.example"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn sequential_batches_read_back_as_their_union(batches in batches_strategy()) {
        let store = Arc::new(MemoryDocumentStore::new());
        let engine = DocumentStoreBackend::new(store, Arc::new(PassThroughBroker::new()));

        let mut last = Timestamp::ZERO;
        for batch in &batches {
            let committed = engine.add_applications(USER, "apps", batch, TOKEN).unwrap();
            prop_assert!(committed > last);
            last = committed;
        }

        prop_assert_eq!(
            as_json_set(&read_all(&engine, "apps")),
            as_json_set(&expected_union(&batches))
        );
        prop_assert_eq!(engine.get_last_modified(USER, "apps", TOKEN).unwrap(), Some(last));
    }
}
