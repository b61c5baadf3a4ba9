//! Integration tests for mirroring a document store onto SQLite.

use appsync_storage::docstore::{
    DocumentStore, DocumentStoreError, MemoryDocumentStore, WriteCondition,
};
use appsync_storage::{
    BackendConfig, DocumentStoreBackend, MirroredBackend, PassThroughBroker, RelationalBackend,
    SqlConfig, StorageEngine, StorageError, Timestamp,
};
use appsync_testkit::{app, origins, ScriptedDocumentStore, TestEngine, USER};
use std::sync::Arc;
use tempfile::TempDir;

const TOKEN: &str = "token";

struct Mirror {
    store: Arc<ScriptedDocumentStore>,
    secondary: Arc<RelationalBackend>,
    engine: MirroredBackend,
}

fn mirror() -> Mirror {
    let store = Arc::new(ScriptedDocumentStore::new(Arc::new(MemoryDocumentStore::new())));
    let primary = DocumentStoreBackend::new(store.clone(), Arc::new(PassThroughBroker::new()));
    let secondary = Arc::new(
        RelationalBackend::open(SqlConfig::in_memory(), Arc::new(PassThroughBroker::new()))
            .unwrap(),
    );
    let engine = MirroredBackend::new(Box::new(primary), Box::new(secondary.clone()));
    Mirror {
        store,
        secondary,
        engine,
    }
}

fn secondary_origins(mirror: &Mirror) -> Vec<String> {
    let read = mirror
        .secondary
        .get_applications(USER, "apps", Timestamp::ZERO, TOKEN)
        .unwrap();
    origins(read.iter().map(|(_, app)| app))
}

#[test]
fn writes_are_copied_to_the_secondary() {
    let mirror = mirror();
    mirror
        .engine
        .add_applications(USER, "apps", &[app("https://a.example", "1")], TOKEN)
        .unwrap();
    assert_eq!(secondary_origins(&mirror), vec!["https://a.example"]);

    mirror.engine.delete(USER, "apps", "c1", "r", TOKEN).unwrap();
    assert!(matches!(
        mirror.secondary.get_uuid(USER, "apps", TOKEN),
        Err(StorageError::CollectionDeleted { .. })
    ));
}

#[test]
fn primary_conflict_is_not_mirrored() {
    let mirror = mirror();
    let key = "apps::item::https://a.example";
    mirror.store.before_put(USER, key, move |inner| {
        inner
            .put(
                USER,
                key,
                r#"{"origin": "https://a.example"}"#,
                WriteCondition::Absent,
            )
            .unwrap();
    });

    assert!(matches!(
        mirror
            .engine
            .add_applications(USER, "apps", &[app("https://a.example", "1")], TOKEN),
        Err(StorageError::EditConflict)
    ));
    assert!(secondary_origins(&mirror).is_empty());
}

#[test]
fn primary_failure_is_not_mirrored() {
    let mirror = mirror();
    mirror.store.fail_next_put(
        USER,
        "apps::meta",
        DocumentStoreError::Server("unavailable".into()),
    );
    assert!(matches!(
        mirror
            .engine
            .add_applications(USER, "apps", &[app("https://a.example", "1")], TOKEN),
        Err(StorageError::Server(_))
    ));
    assert_eq!(mirror.secondary.get_uuid(USER, "apps", TOKEN).unwrap(), None);
}

#[test]
fn reads_come_from_the_primary() {
    let mirror = mirror();
    mirror
        .secondary
        .add_applications(USER, "apps", &[app("https://only-secondary.example", "1")], TOKEN)
        .unwrap();
    assert!(mirror
        .engine
        .get_applications(USER, "apps", Timestamp::ZERO, TOKEN)
        .unwrap()
        .is_empty());
}

#[test]
fn mirrored_engine_from_config_checks_tokens_once() {
    let dir = TempDir::new().unwrap();
    let engine = TestEngine::build(
        BackendConfig::Mirrored {
            readwrite: Box::new(BackendConfig::Memory),
            write: Box::new(BackendConfig::Relational(SqlConfig::at_path(
                dir.path().join("mirror.db"),
            ))),
        },
        None,
        None,
    );

    engine.add("apps", &[app("https://a.example", "1")]);
    assert!(matches!(
        engine.add_applications(USER, "apps", &[app("https://a.example", "1")], "faketoken"),
        Err(StorageError::Auth(_))
    ));

    // The secondary accepted the primary's token and holds the record.
    let secondary = RelationalBackend::open(
        SqlConfig::at_path(dir.path().join("mirror.db")),
        Arc::new(PassThroughBroker::new()),
    )
    .unwrap();
    let read = secondary
        .get_applications(USER, "apps", Timestamp::ZERO, "anything")
        .unwrap();
    assert_eq!(read.len(), 1);
}
