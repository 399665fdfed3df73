//! Handles returned by [`Observable`](super::Observable).

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::Weak;
use std::time::Duration;

/// Unique identifier for an observer or watcher within one observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Removal hook implemented by the observable's shared state.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: ObserverId);
}

/// Registration token for a callback observer.
///
/// Dropping the handle deregisters the observer, as does [`unsubscribe`].
///
/// [`unsubscribe`]: ObserverHandle::unsubscribe
#[must_use = "dropping the handle unsubscribes the observer"]
pub struct ObserverHandle {
    id: ObserverId,
    owner: Option<Weak<dyn Detach>>,
}

impl ObserverHandle {
    pub(crate) fn new(id: ObserverId, owner: Weak<dyn Detach>) -> Self {
        Self {
            id,
            owner: Some(owner),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Deregister now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the observer registered for as long as the observable lives.
    pub fn detach(mut self) {
        self.owner = None;
    }

    fn release(&mut self) {
        if let Some(owner) = self.owner.take().and_then(|weak| weak.upgrade()) {
            owner.detach(self.id);
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("attached", &self.owner.is_some())
            .finish()
    }
}

/// Channel-backed observer. Receives the current value on creation, then
/// every value passed to `set`.
///
/// A watcher whose buffer is full when a value is published is dropped; its
/// receiver then reports disconnection once drained.
pub struct WatchHandle<T> {
    pub id: ObserverId,
    receiver: Receiver<T>,
    owner: Weak<dyn Detach>,
}

impl<T> WatchHandle<T> {
    pub(crate) fn new(id: ObserverId, receiver: Receiver<T>, owner: Weak<dyn Detach>) -> Self {
        Self {
            id,
            receiver,
            owner,
        }
    }

    /// Receive the next value (blocking).
    pub fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a value (non-blocking).
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered and return the newest value.
    pub fn latest(&self) -> Option<T> {
        self.receiver.try_iter().last()
    }

    pub fn receiver(&self) -> &Receiver<T> {
        &self.receiver
    }
}

impl<T> Drop for WatchHandle<T> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(self.id);
        }
    }
}
