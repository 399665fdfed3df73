//! Composition root for collection stores.

use crate::error::Result;
use crate::remote::RemoteDatabase;
use crate::store::{CollectionStore, StoreConfig};
use crate::typed::TypedCollection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Opens live stores against one remote database.
///
/// Each call returns an independent store owned by the caller; nothing is
/// cached or shared between calls.
#[derive(Clone)]
pub struct SyncClient {
    database: Arc<dyn RemoteDatabase>,
    defaults: StoreConfig,
}

impl SyncClient {
    pub fn new(database: Arc<dyn RemoteDatabase>) -> Self {
        Self::with_defaults(database, StoreConfig::default())
    }

    /// Use `defaults` for every store opened without an explicit config.
    pub fn with_defaults(database: Arc<dyn RemoteDatabase>, defaults: StoreConfig) -> Self {
        Self { database, defaults }
    }

    pub fn defaults(&self) -> &StoreConfig {
        &self.defaults
    }

    /// Open a live store on `path`.
    pub fn open(&self, path: &str) -> Result<CollectionStore> {
        self.open_with(path, self.defaults.clone())
    }

    pub fn open_with(&self, path: &str, config: StoreConfig) -> Result<CollectionStore> {
        let remote = self.database.collection(path)?;
        let store = CollectionStore::open(remote, config)?;
        debug!(collection = path, "opened store");
        Ok(store)
    }

    /// Open a live store on `path` decoding documents as `T`.
    pub fn open_typed<T>(&self, path: &str) -> Result<TypedCollection<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Ok(TypedCollection::new(self.open(path)?))
    }
}
