//! Authenticated API client with token refresh.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use super::request::{ApiRequest, RequestKind, UploadForm};
use super::transport::{ApiResponse, PreparedRequest, ReqwestTransport, Transport};
use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::models::{RefreshRequest, RefreshResponse};
use crate::session::SessionStore;

/// Refresh-and-retry cycles allowed per logical request.
pub const MAX_REFRESH_ATTEMPTS: u32 = 1;

const JSON_CONTENT_TYPE: &str = "application/json";

/// HTTP client for the FitControl API.
///
/// Reads the bearer token from the injected [`SessionStore`] before every
/// send. A 401 triggers one refresh through the refresh endpoint followed by
/// one resend; if the refresh cannot be done the session is cleared and the
/// original 401 is returned. Refreshes are single-flight: callers rejected at
/// the same time wait for one refresh and reuse its token.
pub struct ApiClient<T = ReqwestTransport> {
    transport: Arc<T>,
    session: SessionStore,
    config: Arc<ClientConfig>,
    refresh_lock: Arc<Mutex<()>>,
}

impl<T> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            session: self.session.clone(),
            config: Arc::clone(&self.config),
            refresh_lock: Arc::clone(&self.refresh_lock),
        }
    }
}

impl ApiClient<ReqwestTransport> {
    /// Create a client using the `reqwest` transport.
    pub fn new(config: ClientConfig, session: SessionStore) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.user_agent)?;
        Ok(Self::with_transport(config, session, Arc::new(transport)))
    }
}

impl<T: Transport> ApiClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(config: ClientConfig, session: SessionStore, transport: Arc<T>) -> Self {
        Self {
            transport,
            session,
            config: Arc::new(config),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.send(&ApiRequest::get(path)).await?.json()
    }

    pub async fn get_with_query<R, Q>(&self, path: &str, query: &Q) -> Result<R>
    where
        R: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let request = ApiRequest::get(path).query(query)?;
        self.send(&request).await?.json()
    }

    pub async fn post<R, B>(&self, path: &str, body: &B) -> Result<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::post(path).json(body)?;
        self.send(&request).await?.json()
    }

    pub async fn put<R, B>(&self, path: &str, body: &B) -> Result<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::put(path).json(body)?;
        self.send(&request).await?.json()
    }

    pub async fn patch<R, B>(&self, path: &str, body: &B) -> Result<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::patch(path).json(body)?;
        self.send(&request).await?.json()
    }

    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.send(&ApiRequest::delete(path)).await?.json()
    }

    /// POST a multipart form with the upload time budget.
    pub async fn upload<R: DeserializeOwned>(&self, path: &str, form: UploadForm) -> Result<R> {
        let request = ApiRequest::post(path).multipart(form);
        self.send(&request).await?.json()
    }

    /// Send a request through the full pipeline and return the raw response.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.execute(request, 0).await
    }

    /// Refresh the access token now.
    ///
    /// Fails with [`ApiError::NotAuthenticated`] when no refresh token is held.
    /// A failed refresh clears the session.
    pub async fn refresh_session(&self) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;
        let refresh_token = self
            .session
            .refresh_token()
            .await
            .ok_or(ApiError::NotAuthenticated)?;
        self.rotate_tokens(&refresh_token).await
    }

    /// Run `request` starting at `attempt`. Once `attempt` reaches
    /// [`MAX_REFRESH_ATTEMPTS`] a 401 is returned as is.
    pub(crate) async fn execute(&self, request: &ApiRequest, mut attempt: u32) -> Result<ApiResponse> {
        let mut token = self.session.access_token().await;

        loop {
            let response = self.transmit(request, token.as_deref(), attempt).await?;

            if response.is_success() {
                tracing::debug!(
                    method = %request.method(),
                    path = request.path(),
                    status = response.status().as_u16(),
                    attempt,
                    "Request succeeded"
                );
                return Ok(response);
            }

            let error = response.into_error();
            if !error.is_unauthorized() || attempt >= MAX_REFRESH_ATTEMPTS {
                tracing::debug!(
                    method = %request.method(),
                    path = request.path(),
                    status = error.status().map(|s| s.as_u16()),
                    attempt,
                    "Request failed"
                );
                return Err(error);
            }

            attempt += 1;
            tracing::debug!(path = request.path(), "Access token rejected, refreshing");

            match self.refresh_after_rejection(token.as_deref()).await {
                Ok(fresh) => token = Some(fresh),
                Err(refresh_error) => {
                    tracing::warn!(
                        path = request.path(),
                        error = %refresh_error,
                        "Token refresh failed, session cleared"
                    );
                    return Err(error);
                }
            }
        }
    }

    /// Obtain a usable access token after `rejected` got a 401.
    async fn refresh_after_rejection(&self, rejected: Option<&str>) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.session.access_token().await {
            if rejected != Some(current.as_str()) {
                tracing::debug!("Access token already rotated by a concurrent refresh");
                return Ok(current);
            }
        }

        let Some(refresh_token) = self.session.refresh_token().await else {
            self.session.clear().await;
            return Err(ApiError::NotAuthenticated);
        };

        self.rotate_tokens(&refresh_token).await
    }

    /// Exchange the refresh token and store the result. Caller holds the refresh lock.
    async fn rotate_tokens(&self, refresh_token: &str) -> Result<String> {
        match self.request_refresh(refresh_token).await {
            Ok(tokens) => {
                let rotated = tokens.refresh.is_some();
                let applied = self
                    .session
                    .update_tokens_if_current(refresh_token, tokens.access.clone(), tokens.refresh)
                    .await;
                if !applied {
                    // Logged out (or signed in again) while the refresh was in flight.
                    tracing::debug!("Session changed during refresh, discarding new tokens");
                    return Err(ApiError::NotAuthenticated);
                }
                tracing::debug!(refresh_rotated = rotated, "Access token refreshed");
                Ok(tokens.access)
            }
            Err(e) => {
                self.session.clear().await;
                Err(e)
            }
        }
    }

    /// Unauthenticated call to the refresh endpoint.
    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        let request = ApiRequest::post(self.config.refresh_path.as_str()).json(&RefreshRequest {
            refresh: refresh_token,
        })?;

        let response = self.transmit(&request, None, 0).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }

        let tokens: RefreshResponse = response.json()?;
        if tokens.access.is_empty() {
            return Err(ApiError::Decode(
                "Refresh response carried an empty access token".to_string(),
            ));
        }

        Ok(tokens)
    }

    async fn transmit(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        attempt: u32,
    ) -> Result<ApiResponse> {
        let kind = request.kind();
        let mut headers = HeaderMap::new();

        if kind == RequestKind::Interactive {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ApiError::Validation("Access token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let prepared = PreparedRequest {
            method: request.method().clone(),
            url: self.config.url_for(request.path()),
            query: request.query_params().to_vec(),
            headers,
            body: request.body().clone(),
            timeout: self.config.timeout_for(kind),
        };

        tracing::debug!(
            method = %prepared.method,
            url = %prepared.url,
            attempt,
            authenticated = token.is_some(),
            "Sending request"
        );

        self.transport.send(prepared).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{bearer, json_body, json_response, MockTransport};
    use crate::config::Environment;
    use crate::session::test_user;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    const REFRESH: &str = "/auth/refresh/";

    fn config() -> ClientConfig {
        ClientConfig::for_environment(Environment::Development)
            .with_base_url("http://backend.test/api")
    }

    async fn logged_in(access: &str, refresh: &str) -> SessionStore {
        let store = SessionStore::in_memory();
        store
            .establish(test_user(), access.to_string(), refresh.to_string())
            .await;
        store
    }

    /// Accepts only `valid` as bearer; the refresh endpoint answers with `refresh_reply`.
    fn backend(
        valid: &'static str,
        refresh_reply: (u16, serde_json::Value),
    ) -> Arc<MockTransport> {
        MockTransport::new(move |request| {
            if request.url.ends_with(REFRESH) {
                return json_response(refresh_reply.0, refresh_reply.1.clone());
            }
            if bearer(request).as_deref() == Some(valid) {
                json_response(200, json!({"ok": true}))
            } else {
                json_response(401, json!({"detail": "Given token not valid for any token type"}))
            }
        })
    }

    #[tokio::test]
    async fn test_bearer_attached_from_session() {
        let transport = backend("a1", (500, json!({})));
        let client = ApiClient::with_transport(config(), logged_in("a1", "r1").await, transport.clone());

        let value: serde_json::Value = client.get("/users/me/").await.unwrap();
        assert_eq!(value["ok"], true);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://backend.test/api/users/me/");
        assert_eq!(bearer(&requests[0]).as_deref(), Some("a1"));
        assert_eq!(requests[0].headers[CONTENT_TYPE], "application/json");
        assert_eq!(requests[0].headers[ACCEPT], "application/json");
        assert_eq!(requests[0].timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unauthenticated_request_still_sent() {
        let transport = MockTransport::new(|_| json_response(200, json!([1, 2, 3])));
        let client = ApiClient::with_transport(config(), SessionStore::in_memory(), transport.clone());

        let value: Vec<u32> = client.get("/exercises/").await.unwrap();
        assert_eq!(value, vec![1, 2, 3]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key(AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_refresh_then_resend_once() {
        let transport = backend("a2", (200, json!({"access": "a2"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let value: serde_json::Value = client.get("/plans/").await.unwrap();
        assert_eq!(value["ok"], true);

        assert_eq!(transport.calls_to("/plans/"), 2);
        assert_eq!(transport.calls_to(REFRESH), 1);

        let requests = transport.requests();
        assert_eq!(bearer(&requests[0]).as_deref(), Some("a1"));
        assert!(bearer(&requests[1]).is_none());
        assert_eq!(json_body(&requests[1]), json!({"refresh": "r1"}));
        assert_eq!(bearer(&requests[2]).as_deref(), Some("a2"));

        assert_eq!(session.access_token().await.as_deref(), Some("a2"));
        assert_eq!(session.refresh_token().await.as_deref(), Some("r1"));
        assert!(session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let transport = backend("a2", (200, json!({"access": "a2", "refresh": "r2"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport);

        let _: serde_json::Value = client.get("/plans/").await.unwrap();
        assert_eq!(session.refresh_token().await.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let transport = backend(
            "a2",
            (401, json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
        );
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let err = client.get::<serde_json::Value>("/plans/").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(err.message(), "Given token not valid for any token type");

        assert_eq!(transport.calls_to("/plans/"), 1);
        assert_eq!(transport.calls_to(REFRESH), 1);

        let snapshot = session.snapshot().await;
        assert!(snapshot.is_empty());
        assert!(!snapshot.is_authenticated());
    }

    #[tokio::test]
    async fn test_malformed_refresh_reply_clears_session() {
        let transport = backend("a2", (200, json!({"token": "a2"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport);

        let err = client.get::<serde_json::Value>("/plans/").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(session.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_clears_session() {
        let transport = backend("a2", (200, json!({"access": "a2"})));
        let session = logged_in("a1", "").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let err = client.get::<serde_json::Value>("/plans/").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(transport.calls_to(REFRESH), 0);
        assert!(session.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_retried_request_is_not_refreshed_again() {
        let transport = backend("a2", (200, json!({"access": "a2"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let err = client
            .execute(&ApiRequest::get("/plans/"), MAX_REFRESH_ATTEMPTS)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(transport.calls_to(REFRESH), 0);
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(session.access_token().await.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_rejected_resend_is_not_retried() {
        // The refreshed token is rejected too.
        let transport = backend("never", (200, json!({"access": "a2"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let err = client.get::<serde_json::Value>("/plans/").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(transport.calls_to("/plans/"), 2);
        assert_eq!(transport.calls_to(REFRESH), 1);
        assert_eq!(session.access_token().await.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let transport = MockTransport::new(|request| {
            if request.url.ends_with("/boom/") {
                json_response(503, json!({"message": "maintenance"}))
            } else {
                json_response(403, json!({"detail": "forbidden"}))
            }
        });
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let err = client.get::<serde_json::Value>("/boom/").await.unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(err.message(), "maintenance");

        let err = client.delete::<()>("/plans/3/").await.unwrap_err();
        assert!(err.is_client_error());

        assert_eq!(transport.requests().len(), 2);
        assert!(session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let transport =
            MockTransport::new(|_| Err(ApiError::Network("connection refused".to_string())));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let err = client.get::<serde_json::Value>("/plans/").await.unwrap_err();
        assert!(err.is_network_error());
        assert_eq!(err.message(), "connection refused");
        assert_eq!(transport.requests().len(), 1);
        assert!(session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_concurrent_rejections_share_one_refresh() {
        let transport = backend("a2", (200, json!({"access": "a2"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let (first, second) = tokio::join!(
            client.get::<serde_json::Value>("/plans/"),
            client.get::<serde_json::Value>("/exercises/"),
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(transport.calls_to(REFRESH), 1);
        assert_eq!(session.access_token().await.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_repeated_get_is_independent() {
        let transport = backend("a1", (500, json!({})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());
        let before = session.snapshot().await;

        let first: serde_json::Value = client.get("/users/me/").await.unwrap();
        let second: serde_json::Value = client.get("/users/me/").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(session.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_upload_uses_multipart_budget() {
        let transport = backend("a1", (500, json!({})));
        let client = ApiClient::with_transport(config(), logged_in("a1", "r1").await, transport.clone());

        let form = UploadForm::new()
            .text("exercise_id", "4")
            .file("video", "squat.mp4", "video/mp4", b"frames".to_vec());
        let _: serde_json::Value = client.upload("/analyze/", form).await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.timeout, Duration::from_secs(60));
        assert!(!request.headers.contains_key(CONTENT_TYPE));
        assert_eq!(bearer(request).as_deref(), Some("a1"));
        assert!(matches!(request.body, crate::client::RequestBody::Multipart(_)));
    }

    #[tokio::test]
    async fn test_post_sends_json_and_query() {
        let transport = MockTransport::new(|_| json_response(201, json!({"id": 9})));
        let client = ApiClient::with_transport(config(), SessionStore::in_memory(), transport.clone());

        let created: serde_json::Value = client
            .post("/log/", &json!({"exercise_id": 4, "sets_completed": 3}))
            .await
            .unwrap();
        assert_eq!(created["id"], 9);

        let _: serde_json::Value = client
            .get_with_query("/exercises/", &json!({"search": "press", "difficulty_level": null}))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].method, reqwest::Method::POST);
        assert_eq!(json_body(&requests[0])["sets_completed"], 3);
        assert_eq!(requests[1].query, vec![("search".to_string(), "press".to_string())]);
    }

    #[tokio::test]
    async fn test_explicit_refresh_without_token() {
        let transport = backend("a2", (200, json!({"access": "a2"})));
        let client = ApiClient::with_transport(config(), SessionStore::in_memory(), transport.clone());

        let err = client.refresh_session().await.unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
        assert_eq!(transport.requests().len(), 0);
    }

    #[tokio::test]
    async fn test_explicit_refresh() {
        let transport = backend("a2", (200, json!({"access": "a2"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport);

        assert_eq!(client.refresh_session().await.unwrap(), "a2");
        assert_eq!(session.access_token().await.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_concurrent_rejections_with_failed_refresh() {
        let transport = backend("a2", (401, json!({"detail": "Token is invalid or expired"})));
        let session = logged_in("a1", "r1").await;
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let (first, second) = tokio::join!(
            client.get::<serde_json::Value>("/plans/"),
            client.get::<serde_json::Value>("/exercises/"),
        );

        for err in [first.unwrap_err(), second.unwrap_err()] {
            assert!(err.is_unauthorized());
            assert_eq!(err.message(), "Given token not valid for any token type");
        }
        assert_eq!(transport.calls_to(REFRESH), 1);
        assert_eq!(transport.requests().len(), 3);
        assert!(session.snapshot().await.is_empty());
    }

    /// Holds the refresh reply until released.
    struct HeldRefresh {
        inner: Arc<MockTransport>,
        arrived: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl Transport for HeldRefresh {
        async fn send(&self, request: PreparedRequest) -> Result<ApiResponse> {
            if request.url.ends_with(REFRESH) {
                self.arrived.notify_one();
                self.release.notified().await;
            }
            self.inner.send(request).await
        }
    }

    #[tokio::test]
    async fn test_logout_during_refresh_keeps_session_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(crate::session::FileSessionPersistence::new(
            dir.path().join("auth-storage.json"),
        ));
        let session = SessionStore::new(persistence.clone());
        session
            .establish(test_user(), "a1".to_string(), "r1".to_string())
            .await;

        let transport = Arc::new(HeldRefresh {
            inner: backend("a2", (200, json!({"access": "a2"}))),
            arrived: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let client = ApiClient::with_transport(config(), session.clone(), transport.clone());

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.get::<serde_json::Value>("/plans/").await }
        });

        transport.arrived.notified().await;
        session.clear().await;
        transport.release.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_unauthorized());

        let snapshot = session.snapshot().await;
        assert!(snapshot.is_empty());
        assert!(snapshot.access_token().is_none());
        assert!(!persistence.path().exists());

        assert_eq!(transport.inner.calls_to("/plans/"), 1);
        assert_eq!(transport.inner.calls_to(REFRESH), 1);
    }
}
