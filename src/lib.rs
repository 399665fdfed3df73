//! # livesync
//!
//! Live-synchronized collection stores for a UI talking to a remote document
//! database.
//!
//! ## Core Concepts
//!
//! - **Observable**: latest value plus observers; replays on subscribe
//! - **CollectionStore**: mirrors one remote collection into an observable
//!   snapshot through a live subscription, and writes through to the remote
//! - **Write-through**: writes never touch the local snapshot; it advances
//!   only when the remote side echoes the change
//! - **AuthSession**: login state mirrored from an identity provider
//!
//! ## Example
//!
//! ```ignore
//! use livesync::{InMemoryDatabase, SyncClient};
//! use serde_json::json;
//!
//! let client = SyncClient::new(Arc::new(InMemoryDatabase::new()));
//! let todos = client.open("todos")?;
//!
//! let _handle = todos.subscribe(|snapshot| println!("{} todos", snapshot.len()));
//!
//! let id = todos.add(json!({"text": "buy milk", "completed": false})
//!     .as_object().cloned().unwrap_or_default())?;
//! todos.delete(&id)?;
//! todos.dispose();
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod observable;
pub mod remote;
pub mod store;
pub mod typed;
pub mod types;

// Re-exports
pub use auth::memory::InMemoryAuthProvider;
pub use auth::{AuthCallback, AuthProvider, AuthSession, AuthState, UserIdentity};
pub use client::SyncClient;
pub use error::{Result, SyncError};
pub use observable::{Observable, ObserverHandle, ObserverId, WatchHandle};
pub use remote::memory::{Delivery, InMemoryCollection, InMemoryDatabase};
pub use remote::{ChangeCallback, ChangeEvent, RemoteCollection, RemoteDatabase, SubscriptionId};
pub use store::{CollectionStore, IdStrategy, StoreConfig, StoreState};
pub use typed::{Entry, TypedCollection};
pub use types::*;
