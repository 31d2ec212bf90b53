//! Scripted transport for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::StatusCode;

use super::request::RequestBody;
use super::transport::{ApiResponse, PreparedRequest, Transport};
use crate::error::Result;

type Handler = Box<dyn Fn(&PreparedRequest) -> Result<ApiResponse> + Send + Sync>;

/// Answers every request with `handler` and records what was sent.
///
/// Each send yields once before answering so concurrent callers interleave.
pub(crate) struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<PreparedRequest>>,
}

impl MockTransport {
    pub(crate) fn new(
        handler: impl Fn(&PreparedRequest) -> Result<ApiResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests whose URL ends with `path`.
    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(path))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: PreparedRequest) -> Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::task::yield_now().await;
        (self.handler)(&request)
    }
}

pub(crate) fn json_response(status: u16, body: serde_json::Value) -> Result<ApiResponse> {
    Ok(ApiResponse::new(
        StatusCode::from_u16(status).unwrap(),
        HeaderMap::new(),
        serde_json::to_vec(&body).unwrap(),
    ))
}

/// Bearer token carried by a request, if any.
pub(crate) fn bearer(request: &PreparedRequest) -> Option<String> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// JSON body of a request, `Null` for anything else.
pub(crate) fn json_body(request: &PreparedRequest) -> serde_json::Value {
    match &request.body {
        RequestBody::Json(value) => value.clone(),
        _ => serde_json::Value::Null,
    }
}
