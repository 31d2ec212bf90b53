//! Shared, persisted session store.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::{MemoryPersistence, Session, SessionPersistence};
use crate::models::User;

/// Owner of the process-wide [`Session`].
///
/// Clones share the same state. Every mutation is applied in memory and then
/// written through to the persistence backend while the write lock is held,
/// so the stored copy follows the same order as the in-memory one.
/// Persistence failures are logged and never undo the in-memory change.
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<RwLock<Session>>,
    persistence: Arc<dyn SessionPersistence>,
}

impl SessionStore {
    /// Create an empty store backed by `persistence`.
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            state: Arc::new(RwLock::new(Session::default())),
            persistence,
        }
    }

    /// Create an empty store that persists nothing.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPersistence))
    }

    /// Create a store and restore whatever `persistence` holds.
    ///
    /// A missing or unreadable record yields an empty session.
    pub async fn load(persistence: Arc<dyn SessionPersistence>) -> Self {
        let session = match persistence.load().await {
            Ok(Some(session)) => {
                tracing::debug!(
                    authenticated = session.is_authenticated(),
                    "Restored persisted session"
                );
                session
            }
            Ok(None) => Session::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable persisted session");
                Session::default()
            }
        };

        Self {
            state: Arc::new(RwLock::new(session)),
            persistence,
        }
    }

    /// Copy of the current session.
    pub async fn snapshot(&self) -> Session {
        self.state.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state.read().await.access_token().map(str::to_owned)
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state.read().await.refresh_token().map(str::to_owned)
    }

    pub async fn user(&self) -> Option<User> {
        self.state.read().await.user().cloned()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_authenticated()
    }

    /// Start a new session after login or registration.
    pub async fn establish(&self, user: User, access_token: String, refresh_token: String) {
        let mut guard = self.state.write().await;
        *guard = Session::new(user, access_token, refresh_token);
        self.persist(&guard).await;
    }

    /// Replace the access token, and the refresh token if a new one was issued.
    pub async fn update_tokens(&self, access_token: String, refresh_token: Option<String>) {
        let mut guard = self.state.write().await;
        guard.set_tokens(access_token, refresh_token);
        self.persist(&guard).await;
    }

    /// Apply refreshed tokens only if the session still holds `exchanged` as its
    /// refresh token. Returns false, changing nothing, when the session was
    /// cleared or replaced while the refresh was in flight.
    pub async fn update_tokens_if_current(
        &self,
        exchanged: &str,
        access_token: String,
        refresh_token: Option<String>,
    ) -> bool {
        let mut guard = self.state.write().await;
        if guard.refresh_token() != Some(exchanged) {
            return false;
        }
        guard.set_tokens(access_token, refresh_token);
        self.persist(&guard).await;
        true
    }

    /// Replace the stored user.
    pub async fn set_user(&self, user: User) {
        let mut guard = self.state.write().await;
        guard.set_user(user);
        self.persist(&guard).await;
    }

    /// Drop everything: user, both tokens, authenticated flag.
    pub async fn clear(&self) {
        let mut guard = self.state.write().await;
        *guard = Session::default();
        if let Err(e) = self.persistence.remove().await {
            tracing::warn!(error = %e, "Failed to remove persisted session");
        }
    }

    async fn persist(&self, session: &Session) {
        if let Err(e) = self.persistence.save(session).await {
            tracing::warn!(error = %e, "Failed to persist session");
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}
