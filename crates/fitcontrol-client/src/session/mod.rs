//! Authentication session state.
//!
//! The [`SessionStore`] owns the single [`Session`] record of the process and
//! writes every change through to a [`SessionPersistence`] backend.

mod persistence;
mod store;

pub use persistence::{FileSessionPersistence, MemoryPersistence, SessionPersistence};
pub use store::SessionStore;

use serde::{Deserialize, Serialize};

use crate::models::User;

/// Persisted authentication record.
///
/// `is_authenticated` is derived: it holds iff a user and a non-empty access
/// token are both present. Only the store mutates a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    user: Option<User>,

    #[serde(default, rename = "token")]
    access_token: Option<String>,

    #[serde(default)]
    refresh_token: Option<String>,

    #[serde(default)]
    is_authenticated: bool,
}

impl Session {
    pub(crate) fn new(user: User, access_token: String, refresh_token: String) -> Self {
        let mut session = Self {
            user: Some(user),
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            is_authenticated: false,
        };
        session.recompute();
        session
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// True when nothing at all is held.
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.access_token().is_none() && self.refresh_token().is_none()
    }

    pub(crate) fn set_tokens(&mut self, access_token: String, refresh_token: Option<String>) {
        self.access_token = Some(access_token);
        if let Some(refresh) = refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(refresh);
        }
        self.recompute();
    }

    pub(crate) fn set_user(&mut self, user: User) {
        self.user = Some(user);
        self.recompute();
    }

    pub(crate) fn recompute(&mut self) {
        self.is_authenticated = self.user.is_some() && self.access_token().is_some();
    }
}

#[cfg(test)]
pub(crate) fn test_user() -> User {
    User {
        id: 1,
        username: "ana".to_string(),
        email: "ana@example.com".to_string(),
        first_name: Some("Ana".to_string()),
        last_name: None,
        profile: None,
    }
}
