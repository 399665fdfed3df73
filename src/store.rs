//! Synchronized collection store.
//!
//! A [`CollectionStore`] binds one remote collection to an
//! [`Observable`] snapshot. Writes go to the remote side only; the snapshot
//! advances solely when the remote collection's live subscription reports a
//! change, including the echo of this store's own writes. Between a write
//! returning and its echo arriving the snapshot is stale, and remote
//! deliveries may interleave writes from other clients.

use crate::error::{Result, SyncError};
use crate::observable::{Observable, ObserverHandle, WatchHandle};
use crate::remote::{ChangeCallback, ChangeEvent, RemoteCollection, SubscriptionId};
use crate::types::{CollectionSnapshot, DocumentId, Fields, NewRecord, Record};
use crossbeam_channel::RecvTimeoutError;
use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Ids tried by `add` before giving up on finding one not in the snapshot.
const MAX_ID_ATTEMPTS: usize = 16;

/// How `add` picks an id when the caller did not supply one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// Random UUID v4, generated locally.
    #[default]
    Uuid,
    /// Ask the remote collection via [`RemoteCollection::allocate_id`].
    Remote,
}

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Id assignment for `add` without an explicit id.
    pub id_strategy: IdStrategy,

    /// Buffer size of channels opened by `watch` and `wait_until`.
    pub watch_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            id_strategy: IdStrategy::Uuid,
            watch_buffer_size: 64,
        }
    }
}

/// Lifecycle of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreState {
    /// Constructed, not yet subscribed.
    Uninitialized,
    /// Remote subscription being established.
    Subscribing,
    /// Subscribed; snapshot kept current.
    Live,
    /// Subscription cancelled; no further updates accepted.
    Disposed,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreState::Uninitialized => "uninitialized",
            StoreState::Subscribing => "subscribing",
            StoreState::Live => "live",
            StoreState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

struct Lifecycle {
    state: Cell<StoreState>,
    subscription: Cell<Option<SubscriptionId>>,
}

/// State shared with the remote change callback.
struct Shared {
    path: String,
    /// Held for the whole of every snapshot update, so `dispose` waits out an
    /// in-flight one. Reentrant so observers may call back into the store.
    /// Always taken before the snapshot's fan-out lock.
    lifecycle: ReentrantMutex<Lifecycle>,
    snapshot: Observable<CollectionSnapshot>,
}

impl Shared {
    fn apply(&self, event: ChangeEvent) {
        let lifecycle = self.lifecycle.lock();
        let state = lifecycle.state.get();
        if !matches!(state, StoreState::Subscribing | StoreState::Live) {
            debug!(collection = %self.path, %state, "ignoring change event");
            return;
        }

        let current = self.snapshot.get();
        let next = match event {
            ChangeEvent::Snapshot(records) => {
                trace!(collection = %self.path, records = records.len(), "applying remote snapshot");
                CollectionSnapshot {
                    records,
                    error: None,
                    revision: current.revision + 1,
                }
            }
            ChangeEvent::Error(error) => {
                warn!(collection = %self.path, %error, "subscription error");
                CollectionSnapshot {
                    error: Some(error),
                    ..current
                }
            }
        };
        self.snapshot.set(next);
    }
}

/// A live, write-through mirror of one remote collection.
///
/// Dropping the store disposes it.
pub struct CollectionStore {
    config: StoreConfig,
    remote: Arc<dyn RemoteCollection>,
    shared: Arc<Shared>,
}

impl CollectionStore {
    /// Create an unconnected store. Call [`connect`](Self::connect) to start
    /// mirroring.
    pub fn new(remote: Arc<dyn RemoteCollection>, config: StoreConfig) -> Self {
        let shared = Arc::new(Shared {
            path: remote.path().to_string(),
            lifecycle: ReentrantMutex::new(Lifecycle {
                state: Cell::new(StoreState::Uninitialized),
                subscription: Cell::new(None),
            }),
            snapshot: Observable::new(CollectionSnapshot::default()),
        });

        Self {
            config,
            remote,
            shared,
        }
    }

    /// Create a store and establish its live subscription.
    pub fn open(remote: Arc<dyn RemoteCollection>, config: StoreConfig) -> Result<Self> {
        let store = Self::new(remote, config);
        store.connect()?;
        Ok(store)
    }

    /// Establish the live subscription.
    ///
    /// On failure the store returns to `Uninitialized` and may be retried.
    pub fn connect(&self) -> Result<()> {
        {
            let lifecycle = self.shared.lifecycle.lock();
            let state = lifecycle.state.get();
            if state != StoreState::Uninitialized {
                return Err(invalid_state("connect", state));
            }
            lifecycle.state.set(StoreState::Subscribing);
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let callback: ChangeCallback = Arc::new(move |event: ChangeEvent| {
            if let Some(shared) = weak.upgrade() {
                shared.apply(event);
            }
        });

        // No lock across the remote call: the remote may deliver the initial
        // contents from another thread before returning.
        match self.remote.subscribe(callback) {
            Ok(id) => {
                let lifecycle = self.shared.lifecycle.lock();
                if lifecycle.state.get() == StoreState::Disposed {
                    drop(lifecycle);
                    self.remote.unsubscribe(id);
                    return Err(invalid_state("connect", StoreState::Disposed));
                }
                lifecycle.subscription.set(Some(id));
                lifecycle.state.set(StoreState::Live);
                debug!(collection = %self.shared.path, subscription = id.0, "store live");
                Ok(())
            }
            Err(err) => {
                let lifecycle = self.shared.lifecycle.lock();
                if lifecycle.state.get() == StoreState::Subscribing {
                    lifecycle.state.set(StoreState::Uninitialized);
                }
                warn!(collection = %self.shared.path, error = %err, "subscribe failed");
                Err(match err {
                    SyncError::RemoteUnavailable(_) => err,
                    other => SyncError::RemoteUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Cancel the live subscription. Idempotent.
    ///
    /// Waits for an in-flight snapshot update on another thread; once this
    /// returns the snapshot never changes again.
    pub fn dispose(&self) {
        let subscription = {
            let lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state.get() == StoreState::Disposed {
                return;
            }
            lifecycle.state.set(StoreState::Disposed);
            lifecycle.subscription.take()
        };

        if let Some(id) = subscription {
            self.remote.unsubscribe(id);
        }
        debug!(collection = %self.shared.path, "store disposed");
    }

    pub fn state(&self) -> StoreState {
        self.shared.lifecycle.lock().state.get()
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Reads ---

    /// Current snapshot.
    pub fn snapshot(&self) -> CollectionSnapshot {
        self.shared.snapshot.get()
    }

    /// Records of the current snapshot.
    pub fn records(&self) -> Vec<Record> {
        self.shared.snapshot.with(|s| s.records.clone())
    }

    /// Observe the snapshot. `observer` runs immediately with the current
    /// snapshot, then after every remote delivery.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&CollectionSnapshot) + Send + Sync + 'static,
    {
        // The replay may call back into the store; lock in delivery order.
        let _lifecycle = self.shared.lifecycle.lock();
        self.shared.snapshot.subscribe(observer)
    }

    /// Channel-backed view of the snapshot.
    pub fn watch(&self) -> WatchHandle<CollectionSnapshot> {
        let _lifecycle = self.shared.lifecycle.lock();
        self.shared.snapshot.watch(self.config.watch_buffer_size)
    }

    /// Block until the snapshot satisfies `predicate` or `timeout` elapses.
    ///
    /// Must not be called from the thread that delivers remote changes.
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> Option<CollectionSnapshot>
    where
        F: Fn(&CollectionSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut watch = self.watch();

        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match watch.recv_timeout(remaining) {
                Ok(snapshot) if predicate(&snapshot) => return Some(snapshot),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return None,
                // Dropped for falling behind; reopening replays the current value.
                Err(RecvTimeoutError::Disconnected) => watch = self.watch(),
            }
        }
    }

    /// One-shot read of the remote contents. Does not touch the snapshot.
    pub fn list(&self) -> Result<Vec<Record>> {
        let state = self.state();
        if state == StoreState::Disposed {
            return Err(invalid_state("list", state));
        }

        self.remote.get_all().map_err(|err| {
            warn!(collection = %self.shared.path, error = %err, "list failed");
            match err {
                SyncError::RemoteUnavailable(_) => err,
                other => SyncError::RemoteUnavailable(other.to_string()),
            }
        })
    }

    /// One-shot read of the remote document ids.
    pub fn list_ids(&self) -> Result<Vec<DocumentId>> {
        Ok(self.list()?.into_iter().map(|r| r.id).collect())
    }

    // --- Writes ---

    /// Create or replace a document. Assigns an id when `record` has none.
    ///
    /// Returns the id once the remote side acknowledged the write. The
    /// snapshot reflects it only after the subscription echo.
    pub fn add(&self, record: impl Into<NewRecord>) -> Result<DocumentId> {
        self.ensure_live("add")?;

        let record = record.into();
        let id = match record.id.clone() {
            Some(id) => id,
            None => self.assign_id()?,
        };
        let record = record.into_record(id);

        self.write("add", &record.id, &record.fields)?;
        Ok(record.id)
    }

    /// Replace the document `record.id` with `record.fields`.
    ///
    /// Remote writes are create-or-replace, so a missing id is created.
    /// Concurrent writers to the same id: last write wins.
    pub fn update(&self, record: &Record) -> Result<()> {
        self.ensure_live("update")?;
        self.write("update", &record.id, &record.fields)
    }

    /// Delete the document `id`. Deleting a missing id succeeds.
    pub fn delete(&self, id: &DocumentId) -> Result<()> {
        self.ensure_live("delete")?;

        self.remote
            .delete_document(id)
            .map_err(|err| self.write_failure("delete", id, err))
    }

    fn write(&self, operation: &'static str, id: &DocumentId, fields: &Fields) -> Result<()> {
        self.remote
            .set_document(id, fields)
            .map_err(|err| self.write_failure(operation, id, err))
    }

    fn write_failure(&self, operation: &'static str, id: &DocumentId, err: SyncError) -> SyncError {
        warn!(collection = %self.shared.path, %id, operation, error = %err, "write failed");
        match err {
            SyncError::RemoteWriteFailed { .. } => err,
            other => SyncError::write_failed(id.as_str(), other.to_string()),
        }
    }

    fn assign_id(&self) -> Result<DocumentId> {
        let mut last = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = match self.config.id_strategy {
                IdStrategy::Uuid => DocumentId::generate(),
                IdStrategy::Remote => self.remote.allocate_id(),
            };
            if !self.shared.snapshot.with(|s| s.contains(id.as_str())) {
                return Ok(id);
            }
            last = Some(id);
        }

        let id = last.map(String::from).unwrap_or_default();
        warn!(collection = %self.shared.path, %id, "no free document id");
        Err(SyncError::write_failed(
            id,
            format!("no free document id after {MAX_ID_ATTEMPTS} attempts"),
        ))
    }

    fn ensure_live(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            StoreState::Live => Ok(()),
            state => Err(invalid_state(operation, state)),
        }
    }
}

impl Drop for CollectionStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionStore")
            .field("path", &self.shared.path)
            .field("state", &self.state())
            .finish()
    }
}

fn invalid_state(operation: &'static str, state: StoreState) -> SyncError {
    SyncError::InvalidState {
        operation,
        state: state.to_string(),
    }
}
