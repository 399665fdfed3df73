//! In-process remote database.
//!
//! Behaves like a hosted document store from the point of view of
//! [`CollectionStore`](crate::store::CollectionStore): create-or-replace
//! writes, idempotent deletes, full-contents change notifications to every
//! subscriber of a collection. Every handle obtained for the same path shares
//! the same documents, so a second handle plays the part of another client.
//!
//! Delivery can be immediate or queued until [`InMemoryDatabase::flush`],
//! which makes the window between a write being acknowledged and the snapshot
//! catching up observable. Immediate delivery happens before the write
//! returns, unless another thread is already delivering on that collection;
//! that thread then delivers it too, and the writer does not wait. Faults can
//! be injected for reads, writes, and subscriptions.

use crate::error::{Result, SyncError};
use crate::types::{DocumentId, Fields, Record};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    validate_collection_path, ChangeCallback, ChangeEvent, RemoteCollection, RemoteDatabase,
    SubscriptionId,
};

/// Length of ids handed out by [`RemoteCollection::allocate_id`].
const AUTO_ID_LEN: usize = 20;

/// When change notifications reach subscribers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Before the triggering write returns, or by the thread already
    /// delivering on that collection.
    #[default]
    Immediate,
    /// On the next [`InMemoryDatabase::flush`].
    Queued,
}

/// A notification waiting for `flush`.
enum Pending {
    /// Deliver current contents to all subscribers.
    Changed { path: String },
    /// Deliver current contents to one new subscriber.
    Initial { path: String, id: SubscriptionId },
    /// Deliver an error to all subscribers.
    Error { path: String, error: SyncError },
}

/// Shared state behind every handle.
struct Shared {
    collections: RwLock<HashMap<String, Arc<CollectionState>>>,
    queued: AtomicBool,
    available: AtomicBool,
    deny_writes: AtomicBool,
    failing_writes: AtomicUsize,
    next_subscription: AtomicU64,
    pending_tx: Sender<Pending>,
    pending_rx: Receiver<Pending>,
}

struct CollectionState {
    path: String,
    documents: RwLock<BTreeMap<DocumentId, Fields>>,
    subscribers: RwLock<HashMap<SubscriptionId, ChangeCallback>>,
    /// Notifications waiting for the dispatching thread.
    outbox: Mutex<VecDeque<Outgoing>>,
    /// Held by the thread draining `outbox`. Reentrant so a callback may
    /// write back.
    dispatch_lock: ReentrantMutex<()>,
}

/// One delivery to `target` (or everyone): an error, or current contents.
struct Outgoing {
    target: Option<SubscriptionId>,
    error: Option<SyncError>,
}

impl CollectionState {
    fn records(&self) -> Vec<Record> {
        self.documents
            .read()
            .iter()
            .map(|(id, fields)| Record::new(id.clone(), fields.clone()))
            .collect()
    }

    fn dispatch(&self, target: Option<SubscriptionId>, error: Option<SyncError>) {
        self.outbox.lock().push_back(Outgoing { target, error });
        self.drain();
    }

    /// Deliver queued notifications unless another thread is already doing
    /// so. The dispatching thread re-checks the outbox after letting go, so
    /// a notification queued while it held the lock is never stranded.
    fn drain(&self) {
        loop {
            let Some(dispatching) = self.dispatch_lock.try_lock() else {
                return;
            };
            while let Some(next) = self.next_outgoing() {
                self.deliver(next.target, next.error.as_ref());
            }
            drop(dispatching);

            if self.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn next_outgoing(&self) -> Option<Outgoing> {
        self.outbox.lock().pop_front()
    }

    /// Deliver to `target` (or everyone). Contents are read per callback so
    /// a write made by an earlier callback is visible to later ones.
    fn deliver(&self, target: Option<SubscriptionId>, error: Option<&SyncError>) {
        let callbacks: Vec<(SubscriptionId, ChangeCallback)> = self
            .subscribers
            .read()
            .iter()
            .filter(|(id, _)| target.map_or(true, |t| t == **id))
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in callbacks {
            if !self.subscribers.read().contains_key(&id) {
                continue;
            }
            let event = match error {
                Some(err) => ChangeEvent::Error(err.clone()),
                None => ChangeEvent::Snapshot(self.records()),
            };
            trace!(collection = %self.path, subscription = id.0, "delivering change");
            callback(event);
        }
    }
}

/// In-process [`RemoteDatabase`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryDatabase {
    shared: Arc<Shared>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::with_delivery(Delivery::Immediate)
    }

    pub fn with_delivery(delivery: Delivery) -> Self {
        let (pending_tx, pending_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                collections: RwLock::new(HashMap::new()),
                queued: AtomicBool::new(delivery == Delivery::Queued),
                available: AtomicBool::new(true),
                deny_writes: AtomicBool::new(false),
                failing_writes: AtomicUsize::new(0),
                next_subscription: AtomicU64::new(1),
                pending_tx,
                pending_rx,
            }),
        }
    }

    /// Typed handle to a collection, created on first use.
    pub fn open(&self, path: &str) -> Result<InMemoryCollection> {
        validate_collection_path(path)?;

        if let Some(state) = self.shared.collections.read().get(path) {
            return Ok(InMemoryCollection {
                state: Arc::clone(state),
                shared: Arc::clone(&self.shared),
            });
        }

        let state = Arc::clone(
            self.shared
                .collections
                .write()
                .entry(path.to_string())
                .or_insert_with(|| {
                    Arc::new(CollectionState {
                        path: path.to_string(),
                        documents: RwLock::new(BTreeMap::new()),
                        subscribers: RwLock::new(HashMap::new()),
                        outbox: Mutex::new(VecDeque::new()),
                        dispatch_lock: ReentrantMutex::new(()),
                    })
                }),
        );

        Ok(InMemoryCollection {
            state,
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn delivery(&self) -> Delivery {
        if self.shared.queued.load(Ordering::SeqCst) {
            Delivery::Queued
        } else {
            Delivery::Immediate
        }
    }

    /// Switch delivery mode. Already-queued notifications stay queued.
    pub fn set_delivery(&self, delivery: Delivery) {
        self.shared
            .queued
            .store(delivery == Delivery::Queued, Ordering::SeqCst);
    }

    /// Deliver every queued notification, including ones queued by callbacks
    /// during this flush. Returns the number processed.
    pub fn flush(&self) -> usize {
        let mut processed = 0;
        while let Ok(pending) = self.shared.pending_rx.try_recv() {
            processed += 1;
            let (path, target, error) = match pending {
                Pending::Changed { path } => (path, None, None),
                Pending::Initial { path, id } => (path, Some(id), None),
                Pending::Error { path, error } => (path, None, Some(error)),
            };
            let state = self.shared.collections.read().get(&path).cloned();
            if let Some(state) = state {
                state.dispatch(target, error);
            }
        }
        if processed > 0 {
            debug!(processed, "flushed queued notifications");
        }
        processed
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending_rx.len()
    }

    /// While unavailable, reads, subscriptions and writes fail.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Reject every write as a permission error.
    pub fn deny_writes(&self, deny: bool) {
        self.shared.deny_writes.store(deny, Ordering::SeqCst);
    }

    /// Fail the next `count` writes.
    pub fn fail_next_writes(&self, count: usize) {
        self.shared.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Push a subscription-level error to every subscriber of `path`.
    pub fn push_error(&self, path: &str, error: SyncError) -> Result<()> {
        let collection = self.open(path)?;
        collection.notify(Pending::Error {
            path: path.to_string(),
            error,
        });
        Ok(())
    }

    /// Live subscriptions on `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.shared
            .collections
            .read()
            .get(path)
            .map_or(0, |state| state.subscribers.read().len())
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteDatabase for InMemoryDatabase {
    fn collection(&self, path: &str) -> Result<Arc<dyn RemoteCollection>> {
        Ok(Arc::new(self.open(path)?))
    }
}

/// Handle to one collection of an [`InMemoryDatabase`].
#[derive(Clone)]
pub struct InMemoryCollection {
    state: Arc<CollectionState>,
    shared: Arc<Shared>,
}

impl InMemoryCollection {
    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.state.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Fields> {
        self.state.documents.read().get(id).cloned()
    }

    fn check_write(&self, id: &DocumentId) -> Result<()> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(SyncError::write_failed(id.as_str(), "remote unavailable"));
        }
        if self.shared.deny_writes.load(Ordering::SeqCst) {
            return Err(SyncError::write_failed(id.as_str(), "permission denied"));
        }
        let injected = self
            .shared
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::write_failed(id.as_str(), "injected failure"));
        }
        Ok(())
    }

    fn check_available(&self) -> Result<()> {
        if self.shared.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::RemoteUnavailable(format!(
                "collection {} unreachable",
                self.state.path
            )))
        }
    }

    fn notify(&self, pending: Pending) {
        if self.shared.queued.load(Ordering::SeqCst) {
            // Receiver lives in `shared`, so the channel cannot be disconnected.
            let _ = self.shared.pending_tx.send(pending);
            return;
        }
        match pending {
            Pending::Changed { .. } => self.state.dispatch(None, None),
            Pending::Initial { id, .. } => self.state.dispatch(Some(id), None),
            Pending::Error { error, .. } => self.state.dispatch(None, Some(error)),
        }
    }

    fn changed(&self) {
        self.notify(Pending::Changed {
            path: self.state.path.clone(),
        });
    }
}

impl RemoteCollection for InMemoryCollection {
    fn path(&self) -> &str {
        &self.state.path
    }

    fn get_all(&self) -> Result<Vec<Record>> {
        self.check_available()?;
        Ok(self.state.records())
    }

    fn set_document(&self, id: &DocumentId, fields: &Fields) -> Result<()> {
        self.check_write(id)?;

        let mut fields = fields.clone();
        fields.remove(crate::types::ID_FIELD);
        self.state.documents.write().insert(id.clone(), fields);
        debug!(collection = %self.state.path, id = %id, "document set");

        self.changed();
        Ok(())
    }

    fn delete_document(&self, id: &DocumentId) -> Result<()> {
        self.check_write(id)?;

        let existed = self.state.documents.write().remove(id).is_some();
        debug!(collection = %self.state.path, id = %id, existed, "document deleted");

        if existed {
            self.changed();
        }
        Ok(())
    }

    fn subscribe(&self, on_change: ChangeCallback) -> Result<SubscriptionId> {
        self.check_available()?;

        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.state.subscribers.write().insert(id, on_change);
        debug!(collection = %self.state.path, subscription = id.0, "subscribed");

        self.notify(Pending::Initial {
            path: self.state.path.clone(),
            id,
        });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.state.subscribers.write().remove(&id).is_some() {
            debug!(collection = %self.state.path, subscription = id.0, "unsubscribed");
        }
    }

    fn allocate_id(&self) -> DocumentId {
        let raw = Uuid::new_v4().simple().to_string();
        DocumentId::from_trusted(raw[..AUTO_ID_LEN].to_string())
    }
}
