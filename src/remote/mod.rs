//! Remote collection collaborator contract.
//!
//! The network or database client itself lives outside this crate. A
//! [`RemoteCollection`] is one named, server-hosted set of documents keyed by
//! string id; a [`RemoteDatabase`] hands them out by path.
//!
//! Implementations push [`ChangeEvent`]s to subscribers whenever the
//! collection changes, including as an effect of the subscriber's own
//! writes. Delivery is at-least-once and carries the full current contents.
//! Timeouts are the implementation's business; nothing here bounds a call.
//!
//! [`memory`] provides an in-process implementation.

pub mod memory;

use crate::error::{Result, SyncError};
use crate::types::{DocumentId, Fields, Record};
use std::sync::Arc;

/// Unique identifier for a live subscription on a remote collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Pushed to subscribers of a remote collection.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    /// Full current contents of the collection.
    Snapshot(Vec<Record>),
    /// The subscription hit an error. Later snapshots may still follow.
    Error(SyncError),
}

/// Callback invoked for every change event.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// One named remote collection.
pub trait RemoteCollection: Send + Sync {
    /// Collection path, e.g. `"todos"`.
    fn path(&self) -> &str;

    /// One-shot read of every document. Fails with `RemoteUnavailable`.
    fn get_all(&self) -> Result<Vec<Record>>;

    /// Create or replace the document `id`. Fails with `RemoteWriteFailed`.
    fn set_document(&self, id: &DocumentId, fields: &Fields) -> Result<()>;

    /// Delete the document `id`. Deleting a missing document succeeds.
    /// Fails with `RemoteWriteFailed`.
    fn delete_document(&self, id: &DocumentId) -> Result<()>;

    /// Start a live subscription. `on_change` may be called before this
    /// returns, and from any thread. Fails with `RemoteUnavailable`.
    fn subscribe(&self, on_change: ChangeCallback) -> Result<SubscriptionId>;

    /// Cancel a live subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Allocate a fresh document id on behalf of the remote store.
    fn allocate_id(&self) -> DocumentId {
        DocumentId::generate()
    }
}

/// Source of remote collections.
pub trait RemoteDatabase: Send + Sync {
    fn collection(&self, path: &str) -> Result<Arc<dyn RemoteCollection>>;
}

/// Check a collection path: non-empty segments separated by `/`, odd count.
pub fn validate_collection_path(path: &str) -> Result<()> {
    let segments: Vec<&str> = path.split('/').collect();
    if path.is_empty() || segments.iter().any(|s| s.is_empty()) || segments.len() % 2 == 0 {
        return Err(SyncError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_paths() {
        assert!(validate_collection_path("todos").is_ok());
        assert!(validate_collection_path("users/u1/todos").is_ok());
        assert!(validate_collection_path("").is_err());
        assert!(validate_collection_path("users/u1").is_err());
        assert!(validate_collection_path("todos/").is_err());
    }
}
