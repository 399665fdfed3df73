//! Scriptable in-process identity provider.

use crate::error::{Result, SyncError};
use crate::remote::SubscriptionId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{AuthCallback, AuthProvider, UserIdentity};

/// [`AuthProvider`] whose interactive flow picks a pre-selected account.
///
/// Listeners are called synchronously on every change and once on
/// registration with the current user.
pub struct InMemoryAuthProvider {
    /// Account the interactive flow signs in as; `None` means the user
    /// dismisses the prompt.
    selected: Mutex<Option<UserIdentity>>,
    current: RwLock<Option<UserIdentity>>,
    listeners: RwLock<HashMap<SubscriptionId, AuthCallback>>,
    next_id: AtomicU64,
    next_failure: Mutex<Option<String>>,
}

impl InMemoryAuthProvider {
    pub fn new() -> Self {
        Self {
            selected: Mutex::new(None),
            current: RwLock::new(None),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_failure: Mutex::new(None),
        }
    }

    pub fn select_account(&self, account: Option<UserIdentity>) {
        *self.selected.lock() = account;
    }

    /// Make the next interactive sign-in fail with `reason`.
    pub fn fail_next_sign_in(&self, reason: impl Into<String>) {
        *self.next_failure.lock() = Some(reason.into());
    }

    /// Change the signed-in user out of band, e.g. a session expiring or a
    /// sign-in completed in another tab.
    pub fn set_current_user(&self, user: Option<UserIdentity>) {
        *self.current.write() = user.clone();
        self.notify(user);
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.current.read().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, user: Option<UserIdentity>) {
        let listeners: Vec<AuthCallback> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(user.clone());
        }
    }
}

impl Default for InMemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for InMemoryAuthProvider {
    fn sign_in_interactive(&self) -> Result<UserIdentity> {
        if let Some(reason) = self.next_failure.lock().take() {
            return Err(SyncError::AuthFailed(reason));
        }

        let account = self
            .selected
            .lock()
            .clone()
            .ok_or_else(|| SyncError::AuthFailed("no account selected".into()))?;

        debug!(uid = %account.uid, "interactive sign-in");
        self.set_current_user(Some(account.clone()));
        Ok(account)
    }

    fn sign_out(&self) -> Result<()> {
        self.set_current_user(None);
        Ok(())
    }

    fn on_auth_state_changed(&self, callback: AuthCallback) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().insert(id, Arc::clone(&callback));
        callback(self.current_user());
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.write().remove(&id);
    }
}
