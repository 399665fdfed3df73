//! Observable snapshots.
//!
//! An [`Observable`] holds the latest value of some `T` and fans out every
//! change to its observers:
//! - callback observers registered with `subscribe` are invoked once
//!   immediately with the current value, then synchronously on every `set`
//! - channel watchers opened with `watch` buffer values for a consumer that
//!   pulls, and are dropped when they fall behind
//!
//! # Example
//!
//! ```ignore
//! let count = Observable::new(0);
//! let handle = count.subscribe(|v| println!("count = {v}"));  // prints 0
//! count.set(1);                                                // prints 1
//! handle.unsubscribe();
//! ```

mod snapshot;
mod types;

pub use snapshot::Observable;
pub use types::{ObserverHandle, ObserverId, WatchHandle};
