//! Authentication collaborator
//!
//! The user id is an opaque partition key for conversations and settings.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::store::ConversationStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Restore a session from stored tokens.
    async fn set_session(&self, access_token: &str, refresh_token: &str) -> Result<Session>;

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_out(&self) -> Result<()>;
}

/// Keep the store's user partition in step with the auth state.
pub fn spawn_auth_listener(store: ConversationStore, auth: &dyn AuthProvider) -> JoinHandle<()> {
    let mut events = auth.on_auth_state_change();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AuthEvent::SignedIn(session)) | Ok(AuthEvent::TokenRefreshed(session)) => {
                    store.set_user(Some(session.user_id));
                }
                Ok(AuthEvent::SignedOut) => store.set_user(None),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Auth listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
