//! Error handling and edge case tests.

use livesync::{
    CollectionSnapshot, CollectionStore, DocumentId, Fields, InMemoryDatabase, Record,
    RemoteCollection, RemoteDatabase, StoreConfig, StoreState, SyncError,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn test_store(db: &InMemoryDatabase) -> CollectionStore {
    CollectionStore::open(db.collection("todos").unwrap(), StoreConfig::default()).unwrap()
}

fn todo(text: &str) -> Fields {
    json!({"text": text, "completed": false})
        .as_object()
        .cloned()
        .unwrap()
}

// --- Write Failures ---

#[test]
fn test_denied_write_returns_error() {
    let db = InMemoryDatabase::new();
    let store = test_store(&db);
    db.deny_writes(true);

    let result = store.add(todo("nope"));

    match result {
        Err(SyncError::RemoteWriteFailed { reason, .. }) => {
            assert!(reason.contains("permission denied"))
        }
        other => panic!("Expected RemoteWriteFailed, got {:?}", other),
    }
    // Nothing was echoed.
    assert!(store.snapshot().is_empty());
}

#[test]
fn test_failed_update_and_delete_report_id() {
    let db = InMemoryDatabase::new();
    let store = test_store(&db);
    let id = store.add(todo("x")).unwrap();
    db.fail_next_writes(2);

    let record = Record::new(id.clone(), todo("y"));
    let update = store.update(&record).unwrap_err();
    let delete = store.delete(&id).unwrap_err();

    for err in [update, delete] {
        match err {
            SyncError::RemoteWriteFailed { id: failed, .. } => assert_eq!(failed, id.as_str()),
            other => panic!("Expected RemoteWriteFailed, got {:?}", other),
        }
    }
    assert_eq!(store.snapshot().get(id.as_str()).unwrap().get("text"), Some(&json!("x")));
}

#[test]
fn test_write_while_unavailable() {
    let db = InMemoryDatabase::new();
    let store = test_store(&db);
    db.set_available(false);

    let err = store.add(todo("offline")).unwrap_err();
    assert!(matches!(err, SyncError::RemoteWriteFailed { .. }));
    assert!(err.is_retryable());

    db.set_available(true);
    store.add(todo("online")).unwrap();
    assert_eq!(store.snapshot().len(), 1);
}

#[test]
fn test_list_unavailable() {
    let db = InMemoryDatabase::new();
    let store = test_store(&db);
    db.set_available(false);

    assert!(matches!(store.list(), Err(SyncError::RemoteUnavailable(_))));
    assert!(matches!(store.list_ids(), Err(SyncError::RemoteUnavailable(_))));
}

// --- Lifecycle Errors ---

#[test]
fn test_writes_after_dispose_fail() {
    let db = InMemoryDatabase::new();
    let store = test_store(&db);
    let id = store.add(todo("x")).unwrap();
    store.dispose();

    let expected = |operation| SyncError::InvalidState {
        operation,
        state: "disposed".to_string(),
    };
    assert_eq!(store.add(todo("y")).unwrap_err(), expected("add"));
    assert_eq!(
        store.update(&Record::new(id.clone(), todo("y"))).unwrap_err(),
        expected("update")
    );
    assert_eq!(store.delete(&id).unwrap_err(), expected("delete"));
    assert_eq!(store.list().unwrap_err(), expected("list"));
    assert!(!store.add(todo("z")).unwrap_err().is_retryable());
}

#[test]
fn test_list_allowed_before_connect() {
    let db = InMemoryDatabase::new();
    db.open("todos")
        .unwrap()
        .set_document(&DocumentId::new("seed").unwrap(), &todo("seed"))
        .unwrap();
    let store = CollectionStore::new(db.collection("todos").unwrap(), StoreConfig::default());

    assert_eq!(store.state(), StoreState::Uninitialized);
    assert_eq!(store.list_ids().unwrap(), vec![DocumentId::new("seed").unwrap()]);
    assert!(store.snapshot().is_empty());
}

#[test]
fn test_connect_unavailable() {
    let db = InMemoryDatabase::new();
    db.set_available(false);

    let result = CollectionStore::open(db.collection("todos").unwrap(), StoreConfig::default());

    assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
    assert_eq!(db.subscriber_count("todos"), 0);
}

// --- Subscription Errors ---

#[test]
fn test_subscription_error_reaches_observers() {
    let db = InMemoryDatabase::new();
    let store = test_store(&db);
    store.add(todo("x")).unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let _handle = store.subscribe(move |s: &CollectionSnapshot| sink.lock().push(s.error.clone()));

    db.push_error("todos", SyncError::RemoteUnavailable("listener revoked".into()))
        .unwrap();

    let errors = errors.lock();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].is_none());
    assert_eq!(
        errors[1],
        Some(SyncError::RemoteUnavailable("listener revoked".into()))
    );
    assert_eq!(store.snapshot().len(), 1);
}

#[test]
fn test_error_does_not_advance_revision() {
    let db = InMemoryDatabase::new();
    let store = test_store(&db);
    let revision = store.snapshot().revision;
    assert_eq!(revision, 1);

    db.push_error("todos", SyncError::RemoteUnavailable("blip".into()))
        .unwrap();

    assert_eq!(store.snapshot().revision, revision);
}

// --- Input Validation ---

#[test]
fn test_invalid_document_ids() {
    assert!(matches!(
        DocumentId::new(""),
        Err(SyncError::InvalidDocumentId(_))
    ));
    assert!(matches!(
        DocumentId::new("a/b"),
        Err(SyncError::InvalidDocumentId(_))
    ));
}

#[test]
fn test_invalid_collection_path() {
    let db = InMemoryDatabase::new();
    assert!(matches!(
        db.collection("todos/t1"),
        Err(SyncError::InvalidPath(_))
    ));
}
