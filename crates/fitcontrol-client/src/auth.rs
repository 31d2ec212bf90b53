//! Account and session operations.

use serde_json::json;

use crate::client::{ApiClient, ReqwestTransport, Transport};
use crate::error::{ApiError, Result};
use crate::models::{AuthResponse, LoginCredentials, RegisterData, User};

pub const LOGIN_PATH: &str = "/auth/login/";
pub const REGISTER_PATH: &str = "/auth/register/";
pub const VERIFY_PATH: &str = "/auth/verify/";
pub const CHANGE_PASSWORD_PATH: &str = "/auth/change-password/";
pub const PASSWORD_RESET_PATH: &str = "/auth/password-reset/";
pub const PASSWORD_RESET_CONFIRM_PATH: &str = "/auth/password-reset-confirm/";
pub const CURRENT_USER_PATH: &str = "/users/me/";
pub const PROFILE_PATH: &str = "/users/profile/";

const PASSWORD_MISMATCH: &str = "Passwords do not match";

/// Login, registration and profile calls that keep the session store in sync.
pub struct AuthService<T = ReqwestTransport> {
    client: ApiClient<T>,
}

impl<T> Clone for AuthService<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T: Transport> AuthService<T> {
    pub fn new(client: ApiClient<T>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient<T> {
        &self.client
    }

    /// Log in and start a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let credentials = LoginCredentials {
            username: username.to_string(),
            password: password.to_string(),
        };

        let response: AuthResponse = self.client.post(LOGIN_PATH, &credentials).await?;
        self.establish(response).await
    }

    /// Create an account and start a session.
    pub async fn register(&self, data: &RegisterData) -> Result<User> {
        check_confirmation(&data.password, &data.confirm_password)?;

        let response: AuthResponse = self.client.post(REGISTER_PATH, data).await?;
        self.establish(response).await
    }

    /// Drop the local session. The backend keeps no server-side session to end.
    pub async fn logout(&self) {
        self.client.session().clear().await;
        tracing::info!("Logged out");
    }

    /// Refresh the access token explicitly.
    pub async fn refresh_access_token(&self) -> Result<()> {
        self.client.refresh_session().await.map(|_| ())
    }

    /// Ask the backend whether `token` is still valid. Any failure counts as invalid.
    pub async fn verify_token(&self, token: &str) -> bool {
        match self
            .client
            .post::<serde_json::Value, _>(VERIFY_PATH, &json!({ "token": token }))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Token verification failed");
                false
            }
        }
    }

    /// Fetch the current user and store it in the session.
    pub async fn current_user(&self) -> Result<User> {
        let user: User = self.client.get(CURRENT_USER_PATH).await?;
        self.client.session().set_user(user.clone()).await;
        Ok(user)
    }

    /// Update profile fields and store the returned user.
    pub async fn update_profile(&self, changes: &serde_json::Value) -> Result<User> {
        if self.client.session().user().await.is_none() {
            return Err(ApiError::NotAuthenticated);
        }

        let user: User = self.client.patch(PROFILE_PATH, changes).await?;
        self.client.session().set_user(user.clone()).await;
        Ok(user)
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        check_confirmation(new_password, confirm_password)?;

        let _: serde_json::Value = self
            .client
            .post(
                CHANGE_PASSWORD_PATH,
                &json!({
                    "old_password": old_password,
                    "new_password": new_password,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .post(PASSWORD_RESET_PATH, &json!({ "email": email }))
            .await?;
        Ok(())
    }

    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        check_confirmation(new_password, confirm_password)?;

        let _: serde_json::Value = self
            .client
            .post(
                PASSWORD_RESET_CONFIRM_PATH,
                &json!({
                    "token": token,
                    "new_password": new_password,
                }),
            )
            .await?;
        Ok(())
    }

    async fn establish(&self, response: AuthResponse) -> Result<User> {
        let user = response.user;
        self.client
            .session()
            .establish(user.clone(), response.access, response.refresh)
            .await;
        tracing::info!(user_id = user.id, username = %user.username, "Session established");
        Ok(user)
    }
}

fn check_confirmation(password: &str, confirmation: &str) -> Result<()> {
    if password != confirmation {
        return Err(ApiError::Validation(PASSWORD_MISMATCH.to_string()));
    }
    Ok(())
}
