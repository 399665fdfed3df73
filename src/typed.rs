//! Serde-typed view over a [`CollectionStore`].

use crate::error::Result;
use crate::observable::ObserverHandle;
use crate::store::CollectionStore;
use crate::types::{CollectionSnapshot, DocumentId, NewRecord, Record};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tracing::warn;

/// A decoded document.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry<T> {
    pub id: DocumentId,
    pub value: T,
}

/// Collection whose documents all decode as `T`.
///
/// `T` sees the document id under `"id"` when decoding, and a string `"id"`
/// in a value passed to `add` is used as the document id.
pub struct TypedCollection<T> {
    store: CollectionStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedCollection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: CollectionStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    pub fn into_store(self) -> CollectionStore {
        self.store
    }

    pub fn add(&self, value: &T) -> Result<DocumentId> {
        self.store.add(NewRecord::from_typed(value)?)
    }

    pub fn update(&self, id: &DocumentId, value: &T) -> Result<()> {
        self.store.update(&Record::from_typed(id.clone(), value)?)
    }

    pub fn delete(&self, id: &DocumentId) -> Result<()> {
        self.store.delete(id)
    }

    /// Decode the current snapshot. Fails on the first undecodable document.
    pub fn items(&self) -> Result<Vec<Entry<T>>> {
        self.store
            .records()
            .iter()
            .map(decode_entry)
            .collect()
    }

    /// One-shot remote read, decoded.
    pub fn list(&self) -> Result<Vec<Entry<T>>> {
        self.store.list()?.iter().map(decode_entry).collect()
    }

    /// Observe decoded snapshots. Documents that do not decode as `T` are
    /// skipped and logged.
    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&[Entry<T>]) + Send + Sync + 'static,
    {
        let path = self.store.path().to_string();
        self.store.subscribe(move |snapshot: &CollectionSnapshot| {
            let entries: Vec<Entry<T>> = snapshot
                .records
                .iter()
                .filter_map(|record| match decode_entry(record) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(collection = %path, id = %record.id, error = %err, "skipping undecodable document");
                        None
                    }
                })
                .collect();
            observer(&entries);
        })
    }
}

fn decode_entry<T: DeserializeOwned>(record: &Record) -> Result<Entry<T>> {
    Ok(Entry {
        id: record.id.clone(),
        value: record.decode()?,
    })
}
