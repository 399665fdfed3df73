//! Observable value with replay-on-subscribe fan-out.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::types::{Detach, ObserverHandle, ObserverId, WatchHandle};

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: RwLock<T>,
    observers: RwLock<HashMap<ObserverId, Observer<T>>>,
    watchers: RwLock<HashMap<ObserverId, Sender<T>>>,
    next_id: AtomicU64,
    /// Bumped on every `set`; lets an outer fan-out notice it was superseded
    /// by a `set` issued from inside an observer.
    version: AtomicU64,
    /// Serializes fan-out. Reentrant so observers may call `set`/`subscribe`.
    emit_lock: ReentrantMutex<()>,
}

impl<T: Send + Sync + 'static> Detach for Inner<T> {
    fn detach(&self, id: ObserverId) {
        if self.observers.write().remove(&id).is_none() {
            self.watchers.write().remove(&id);
        }
    }
}

/// Holds the latest value of `T` and notifies observers on every change.
///
/// Cloning yields another handle to the same value and observer list.
pub struct Observable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(initial),
                observers: RwLock::new(HashMap::new()),
                watchers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                version: AtomicU64::new(0),
                emit_lock: ReentrantMutex::new(()),
            }),
        }
    }

    /// Register `observer` and invoke it once with the current value.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let _emit = self.inner.emit_lock.lock();

        let id = self.next_id();
        let observer: Observer<T> = Arc::new(observer);
        self.inner.observers.write().insert(id, Arc::clone(&observer));

        let current = self.inner.value.read().clone();
        observer(&current);

        ObserverHandle::new(id, self.owner())
    }

    /// Open a channel-backed watcher holding up to `buffer_size` values.
    /// The current value is queued immediately.
    pub fn watch(&self, buffer_size: usize) -> WatchHandle<T> {
        let _emit = self.inner.emit_lock.lock();

        let id = self.next_id();
        let (sender, receiver) = bounded(buffer_size.max(1));
        let current = self.inner.value.read().clone();
        let _ = sender.try_send(current);
        self.inner.watchers.write().insert(id, sender);

        WatchHandle::new(id, receiver, self.owner())
    }

    /// Replace the value and notify every registered observer.
    pub fn set(&self, value: T) {
        let _emit = self.inner.emit_lock.lock();

        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.value.write() = value.clone();

        let observers: Vec<(ObserverId, Observer<T>)> = self
            .inner
            .observers
            .read()
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect();
        for (id, observer) in observers {
            if self.inner.version.load(Ordering::SeqCst) != version {
                // A nested `set` already delivered a newer value to everyone.
                return;
            }
            // Removed by an earlier observer during this fan-out.
            if !self.inner.observers.read().contains_key(&id) {
                continue;
            }
            observer(&value);
        }

        if self.inner.version.load(Ordering::SeqCst) == version {
            self.broadcast_watchers(&value);
        }
    }

    /// Replace the value with `f(current)` and notify.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let _emit = self.inner.emit_lock.lock();
        let next = f(&self.inner.value.read());
        self.set(next);
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value without cloning.
    ///
    /// `f` must not call `set` on this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Number of callback observers plus live watchers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len() + self.inner.watchers.read().len()
    }

    fn next_id(&self) -> ObserverId {
        ObserverId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn owner(&self) -> Weak<dyn Detach> {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        weak
    }

    /// Push to watchers. Drops watchers that fail to receive.
    fn broadcast_watchers(&self, value: &T) {
        let mut to_remove = Vec::new();

        {
            let watchers = self.inner.watchers.read();
            for (id, sender) in watchers.iter() {
                match sender.try_send(value.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                        to_remove.push(*id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut watchers = self.inner.watchers.write();
            for id in to_remove {
                watchers.remove(&id);
            }
        }
    }
}

impl<T: Clone + Default + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + std::fmt::Debug + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.read())
            .field("observers", &self.observer_count())
            .finish()
    }
}
