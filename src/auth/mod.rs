//! Login state.
//!
//! The identity provider handshake lives outside this crate behind
//! [`AuthProvider`]. [`AuthSession`] mirrors the provider's sign-in and
//! sign-out events into an observable [`AuthState`], the same way a
//! [`CollectionStore`](crate::store::CollectionStore) mirrors a remote
//! collection.

pub mod memory;
mod session;

pub use session::AuthSession;

use crate::error::Result;
use crate::remote::SubscriptionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Identity reported by the provider for a signed-in user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub uid: String,
    pub provider_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl UserIdentity {
    pub fn new(uid: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            provider_id: provider_id.into(),
            display_name: None,
            email: None,
            photo_url: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Observable login state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_logged_in: bool,
    pub user: Option<UserIdentity>,
    /// True once the provider has reported at least once.
    pub provider_controlled: bool,
    /// Application data attached to the session, kept across sign-in events.
    pub data: Value,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            is_logged_in: false,
            user: None,
            provider_controlled: false,
            data: Value::Object(Default::default()),
        }
    }
}

impl AuthState {
    pub fn uid(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.uid.as_str())
    }
}

/// Called with the current user (or `None` when signed out).
pub type AuthCallback = Arc<dyn Fn(Option<UserIdentity>) + Send + Sync>;

/// Identity provider contract.
pub trait AuthProvider: Send + Sync {
    /// Run the interactive sign-in flow. Fails with `AuthFailed`.
    fn sign_in_interactive(&self) -> Result<UserIdentity>;

    fn sign_out(&self) -> Result<()>;

    /// Register for sign-in and sign-out events. The callback is invoked
    /// with the current user before or shortly after this returns.
    fn on_auth_state_changed(&self, callback: AuthCallback) -> Result<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId);
}
