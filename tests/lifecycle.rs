//! Subscription lifecycle tests: disposal, in-flight deliveries, handle release.

use crossbeam_channel::{bounded, unbounded};
use livesync::{
    ChangeCallback, ChangeEvent, CollectionSnapshot, CollectionStore, DocumentId, Fields,
    InMemoryDatabase, Record, RemoteCollection, RemoteDatabase, StoreConfig, StoreState,
    SubscriptionId, SyncClient,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Remote whose deliveries are triggered by hand. Keeps cancelled callbacks
/// around so a delivery that raced with `unsubscribe` can be replayed.
#[derive(Default)]
struct ManualRemote {
    documents: Mutex<BTreeMap<DocumentId, Fields>>,
    live: Mutex<HashMap<SubscriptionId, ChangeCallback>>,
    cancelled: Mutex<Vec<ChangeCallback>>,
    next_id: AtomicU64,
}

impl ManualRemote {
    fn records(&self) -> Vec<Record> {
        self.documents
            .lock()
            .iter()
            .map(|(id, fields)| Record::new(id.clone(), fields.clone()))
            .collect()
    }

    /// Deliver current contents to live subscribers.
    fn fire(&self) {
        let callbacks: Vec<ChangeCallback> = self.live.lock().values().cloned().collect();
        for callback in callbacks {
            callback(ChangeEvent::Snapshot(self.records()));
        }
    }

    /// Deliver current contents to cancelled subscribers, as a late network
    /// message would.
    fn fire_cancelled(&self) {
        let callbacks: Vec<ChangeCallback> = self.cancelled.lock().clone();
        for callback in callbacks {
            callback(ChangeEvent::Snapshot(self.records()));
        }
    }

    fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl RemoteCollection for ManualRemote {
    fn path(&self) -> &str {
        "manual"
    }

    fn get_all(&self) -> livesync::Result<Vec<Record>> {
        Ok(self.records())
    }

    fn set_document(&self, id: &DocumentId, fields: &Fields) -> livesync::Result<()> {
        self.documents.lock().insert(id.clone(), fields.clone());
        Ok(())
    }

    fn delete_document(&self, id: &DocumentId) -> livesync::Result<()> {
        self.documents.lock().remove(id);
        Ok(())
    }

    fn subscribe(&self, on_change: ChangeCallback) -> livesync::Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live.lock().insert(id, on_change);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(callback) = self.live.lock().remove(&id) {
            self.cancelled.lock().push(callback);
        }
    }
}

fn manual_store() -> (Arc<ManualRemote>, CollectionStore) {
    let remote = Arc::new(ManualRemote::default());
    let store = CollectionStore::open(remote.clone(), StoreConfig::default()).unwrap();
    (remote, store)
}

fn todo(text: &str) -> Fields {
    json!({ "text": text }).as_object().cloned().unwrap()
}

type Job = Box<dyn FnOnce() + Send>;

/// Run each job on its own thread. Fails if any is still running after
/// `timeout`, which is how a lock-order deadlock shows up.
fn run_concurrently(timeout: Duration, jobs: Vec<Job>) {
    let (done_tx, done_rx) = unbounded::<()>();
    let count = jobs.len();
    for job in jobs {
        let done = done_tx.clone();
        std::thread::spawn(move || {
            job();
            let _ = done.send(());
        });
    }
    for _ in 0..count {
        done_rx
            .recv_timeout(timeout)
            .expect("threads did not finish in time");
    }
}

const ROUNDS: usize = 2_000;

/// Writes from another client, cycling over a few ids.
fn foreign_writer(db: &InMemoryDatabase) -> Job {
    let foreign = db.open("todos").unwrap();
    Box::new(move || {
        for i in 0..ROUNDS {
            let id = DocumentId::new(format!("doc-{}", i % 8)).unwrap();
            foreign.set_document(&id, &todo(&i.to_string())).unwrap();
        }
    })
}

// --- Disposal ---

#[test]
fn test_dispose_then_remote_change_leaves_snapshot() {
    let db = InMemoryDatabase::new();
    let store = SyncClient::new(Arc::new(db.clone())).open("todos").unwrap();
    store.add(todo("before")).unwrap();
    let frozen = store.snapshot();

    store.dispose();
    db.open("todos")
        .unwrap()
        .set_document(&DocumentId::new("after").unwrap(), &todo("after"))
        .unwrap();

    assert_eq!(store.snapshot(), frozen);
    assert_eq!(store.state(), StoreState::Disposed);
}

#[test]
fn test_dispose_is_idempotent() {
    let (remote, store) = manual_store();
    assert_eq!(remote.live_count(), 1);

    store.dispose();
    store.dispose();
    drop(store);

    assert_eq!(remote.live_count(), 0);
    assert_eq!(remote.cancelled.lock().len(), 1);
}

#[test]
fn test_late_delivery_after_dispose_is_ignored() {
    let (remote, store) = manual_store();
    remote.set_document(&DocumentId::new("a").unwrap(), &todo("a")).unwrap();
    remote.fire();
    assert_eq!(store.snapshot().len(), 1);

    store.dispose();
    remote.set_document(&DocumentId::new("b").unwrap(), &todo("b")).unwrap();
    remote.fire_cancelled();

    assert_eq!(store.snapshot().len(), 1);
}

#[test]
fn test_snapshot_only_advances_on_delivery() {
    let (remote, store) = manual_store();

    let id = store.add(todo("written")).unwrap();
    assert!(store.snapshot().is_empty());
    assert!(!store.snapshot().is_synced());

    remote.fire();
    let snapshot = store.snapshot();
    assert!(snapshot.is_synced());
    assert!(snapshot.contains(id.as_str()));
}

#[test]
fn test_dispose_waits_for_in_flight_update() {
    let (remote, store) = manual_store();
    let store = Arc::new(store);

    let (entered_tx, entered_rx) = bounded::<()>(1);
    let (release_tx, release_rx) = bounded::<()>(1);
    let _handle = store.subscribe(move |s: &CollectionSnapshot| {
        if s.revision == 1 {
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }
    });

    remote.set_document(&DocumentId::new("a").unwrap(), &todo("a")).unwrap();
    let deliverer = {
        let remote = Arc::clone(&remote);
        std::thread::spawn(move || remote.fire())
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let disposed = Arc::new(AtomicBool::new(false));
    let disposer = {
        let store = Arc::clone(&store);
        let disposed = Arc::clone(&disposed);
        std::thread::spawn(move || {
            store.dispose();
            disposed.store(true, Ordering::SeqCst);
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    assert!(!disposed.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    deliverer.join().unwrap();
    disposer.join().unwrap();

    assert!(disposed.load(Ordering::SeqCst));
    assert_eq!(store.snapshot().len(), 1);

    remote.set_document(&DocumentId::new("b").unwrap(), &todo("b")).unwrap();
    remote.fire_cancelled();
    assert_eq!(store.snapshot().len(), 1);
}

#[test]
fn test_observer_may_dispose_store() {
    let db = InMemoryDatabase::new();
    let store = Arc::new(
        CollectionStore::open(db.collection("todos").unwrap(), StoreConfig::default()).unwrap(),
    );

    let weak = Arc::downgrade(&store);
    let _handle = store.subscribe(move |s: &CollectionSnapshot| {
        if s.len() == 2 {
            if let Some(store) = weak.upgrade() {
                store.dispose();
            }
        }
    });

    store.add(todo("one")).unwrap();
    store.add(todo("two")).unwrap();
    assert_eq!(store.state(), StoreState::Disposed);
    assert_eq!(db.subscriber_count("todos"), 0);

    db.open("todos")
        .unwrap()
        .set_document(&DocumentId::new("three").unwrap(), &todo("three"))
        .unwrap();
    assert_eq!(store.snapshot().len(), 2);
}

#[test]
fn test_observer_may_write_back() {
    let db = InMemoryDatabase::new();
    let store = Arc::new(
        CollectionStore::open(db.collection("todos").unwrap(), StoreConfig::default()).unwrap(),
    );

    // Keep a "count" document in step with the number of todos.
    let weak = Arc::downgrade(&store);
    let _handle = store.subscribe(move |s: &CollectionSnapshot| {
        let todos = s.records.iter().filter(|r| r.id.as_str() != "count").count();
        let recorded = s.get("count").and_then(|r| r.get("n")).and_then(|v| v.as_u64());
        if recorded != Some(todos as u64) {
            if let Some(store) = weak.upgrade() {
                let count = Record::new(
                    DocumentId::new("count").unwrap(),
                    json!({ "n": todos }).as_object().cloned().unwrap(),
                );
                store.update(&count).unwrap();
            }
        }
    });

    store.add(todo("a")).unwrap();
    store.add(todo("b")).unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.get("count").unwrap().get("n"), Some(&json!(2)));
    assert_eq!(snapshot.records, store.list().unwrap());
}

#[test]
fn test_dropped_store_releases_subscription() {
    let db = InMemoryDatabase::new();
    let client = SyncClient::new(Arc::new(db.clone()));

    for _ in 0..10 {
        let store = client.open("todos").unwrap();
        store.add(todo("x")).unwrap();
    }

    assert_eq!(db.subscriber_count("todos"), 0);
    assert_eq!(db.open("todos").unwrap().len(), 10);
}

// --- Concurrent Deliveries ---

#[test]
fn test_subscribe_while_another_thread_delivers() {
    let db = InMemoryDatabase::new();
    let store = Arc::new(
        CollectionStore::open(db.collection("todos").unwrap(), StoreConfig::default()).unwrap(),
    );

    let subscriber: Job = {
        let store = Arc::clone(&store);
        Box::new(move || {
            for _ in 0..ROUNDS {
                let weak = Arc::downgrade(&store);
                let handle = store.subscribe(move |_: &CollectionSnapshot| {
                    if let Some(store) = weak.upgrade() {
                        let _ = store.state();
                    }
                });
                drop(handle);
            }
        })
    };

    run_concurrently(Duration::from_secs(20), vec![foreign_writer(&db), subscriber]);

    assert_eq!(store.state(), StoreState::Live);
    assert_eq!(store.records(), store.list().unwrap());
}

#[test]
fn test_write_from_replay_while_another_thread_delivers() {
    let db = InMemoryDatabase::new();
    let store = Arc::new(
        CollectionStore::open(db.collection("todos").unwrap(), StoreConfig::default()).unwrap(),
    );

    // Each observer writes once, from its replay.
    let subscriber: Job = {
        let store = Arc::clone(&store);
        Box::new(move || {
            for round in 0..ROUNDS {
                let weak = Arc::downgrade(&store);
                let first = AtomicBool::new(true);
                let handle = store.subscribe(move |_: &CollectionSnapshot| {
                    if !first.swap(false, Ordering::SeqCst) {
                        return;
                    }
                    if let Some(store) = weak.upgrade() {
                        let seen = Record::new(
                            DocumentId::new("seen").unwrap(),
                            json!({ "round": round }).as_object().cloned().unwrap(),
                        );
                        store.update(&seen).unwrap();
                    }
                });
                drop(handle);
            }
        })
    };

    run_concurrently(Duration::from_secs(20), vec![foreign_writer(&db), subscriber]);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.records, store.list().unwrap());
    assert_eq!(
        snapshot.get("seen").unwrap().get("round"),
        Some(&json!(ROUNDS - 1))
    );
}

#[test]
fn test_connect_after_dispose_rejected() {
    let (_remote, store) = manual_store();
    store.dispose();
    assert!(matches!(
        store.connect(),
        Err(livesync::SyncError::InvalidState { .. })
    ));
}
