//! Observable login session bound to an identity provider.

use crate::error::{Result, SyncError};
use crate::observable::{Observable, ObserverHandle, WatchHandle};
use crate::remote::SubscriptionId;
use parking_lot::ReentrantMutex;
use serde_json::Value;
use std::cell::Cell;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::{AuthCallback, AuthProvider, AuthState, UserIdentity};

/// Buffer size for [`AuthSession::watch`].
const WATCH_BUFFER: usize = 16;

struct Shared {
    /// `Disposed` is terminal.
    subscription: ReentrantMutex<Cell<SessionSlot>>,
    state: Observable<AuthState>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SessionSlot {
    Subscribing,
    Live(SubscriptionId),
    Disposed,
}

impl Shared {
    fn apply(&self, user: Option<UserIdentity>) {
        let slot = self.subscription.lock();
        if slot.get() == SessionSlot::Disposed {
            debug!("ignoring auth event after dispose");
            return;
        }

        self.state.update(move |current| AuthState {
            is_logged_in: user.is_some(),
            user,
            provider_controlled: true,
            data: current.data.clone(),
        });
    }
}

/// Login state mirrored from an [`AuthProvider`].
///
/// `login` and `logout` return the provider's failure to the caller; the
/// observable state changes only when the provider reports the transition.
/// Dropping the session disposes it.
pub struct AuthSession {
    provider: Arc<dyn AuthProvider>,
    shared: Arc<Shared>,
}

impl AuthSession {
    /// Subscribe to `provider` and start mirroring its login state.
    pub fn connect(provider: Arc<dyn AuthProvider>) -> Result<Self> {
        let shared = Arc::new(Shared {
            subscription: ReentrantMutex::new(Cell::new(SessionSlot::Subscribing)),
            state: Observable::new(AuthState::default()),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let callback: AuthCallback = Arc::new(move |user: Option<UserIdentity>| {
            if let Some(shared) = weak.upgrade() {
                shared.apply(user);
            }
        });

        let id = provider.on_auth_state_changed(callback)?;
        shared.subscription.lock().set(SessionSlot::Live(id));
        debug!(subscription = id.0, "auth session live");

        Ok(Self { provider, shared })
    }

    /// Run the provider's interactive sign-in.
    pub fn login(&self) -> Result<UserIdentity> {
        self.ensure_live("login")?;

        match self.provider.sign_in_interactive() {
            Ok(user) => {
                info!(uid = %user.uid, provider = %user.provider_id, "signed in");
                Ok(user)
            }
            Err(err) => {
                warn!(error = %err, "sign-in failed");
                Err(match err {
                    SyncError::AuthFailed(_) => err,
                    other => SyncError::AuthFailed(other.to_string()),
                })
            }
        }
    }

    pub fn logout(&self) -> Result<()> {
        self.ensure_live("logout")?;

        self.provider.sign_out().map_err(|err| {
            warn!(error = %err, "sign-out failed");
            err
        })?;
        info!("signed out");
        Ok(())
    }

    /// Current login state.
    pub fn state(&self) -> AuthState {
        self.shared.state.get()
    }

    pub fn is_logged_in(&self) -> bool {
        self.shared.state.with(|s| s.is_logged_in)
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        // Provider events take the slot before the state's fan-out lock.
        let _slot = self.shared.subscription.lock();
        self.shared.state.subscribe(observer)
    }

    pub fn watch(&self) -> WatchHandle<AuthState> {
        let _slot = self.shared.subscription.lock();
        self.shared.state.watch(WATCH_BUFFER)
    }

    /// Replace the application data carried in the state.
    pub fn set_data(&self, data: Value) {
        let _slot = self.shared.subscription.lock();
        self.shared.state.update(move |current| AuthState {
            data,
            ..current.clone()
        });
    }

    /// Stop mirroring. Idempotent.
    pub fn dispose(&self) {
        let previous = {
            let slot = self.shared.subscription.lock();
            slot.replace(SessionSlot::Disposed)
        };

        if let SessionSlot::Live(id) = previous {
            self.provider.unsubscribe(id);
            debug!(subscription = id.0, "auth session disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.subscription.lock().get() == SessionSlot::Disposed
    }

    fn ensure_live(&self, operation: &'static str) -> Result<()> {
        if self.is_disposed() {
            Err(SyncError::InvalidState {
                operation,
                state: "disposed".into(),
            })
        } else {
            Ok(())
        }
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
