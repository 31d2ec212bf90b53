//! API client error types.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Message shown when nothing more specific can be derived from a failure.
pub const DEFAULT_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Body fields inspected, in order, for a server-provided message.
const MESSAGE_FIELDS: [&str; 3] = ["detail", "message", "error"];

/// Errors that can occur while talking to the FitControl backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response was received (connection refused, DNS, TLS, reset).
    #[error("{0}")]
    Network(String),

    /// The request did not complete within its time budget.
    #[error("Request timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// The server answered with a non-success status.
    #[error("Request failed with status code {}", .status.as_u16())]
    Http {
        status: StatusCode,
        /// Parsed JSON body, or the raw text wrapped in a JSON string.
        body: Option<serde_json::Value>,
    },

    /// A response body could not be decoded into the expected type.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// The operation needs a session that is not present.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Input rejected before anything was sent.
    #[error("{0}")]
    Validation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session persistence failed.
    #[error("Session storage error: {0}")]
    Persistence(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

impl ApiError {
    /// Build an HTTP error from a raw response status and body.
    pub fn from_status(status: StatusCode, body: &[u8]) -> Self {
        let body = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(body).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
            }))
        };

        ApiError::Http { status, body }
    }

    /// HTTP status of the response, if one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body, if one was received.
    pub fn body(&self) -> Option<&serde_json::Value> {
        match self {
            ApiError::Http { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// True for a 401 response.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// True when no response was received at all.
    pub fn is_network_error(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }

    /// True for 5xx responses.
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s.as_u16() >= 500)
    }

    /// True for 4xx responses.
    pub fn is_client_error(&self) -> bool {
        self.status()
            .is_some_and(|s| (400..500).contains(&s.as_u16()))
    }

    /// Human-readable message for presenting the failure to a user.
    ///
    /// Looks at `detail`, `message` and `error` in the response body, then at
    /// the error's own description, then falls back to
    /// [`DEFAULT_ERROR_MESSAGE`]. Never returns an empty string.
    pub fn message(&self) -> String {
        if let Some(body) = self.body() {
            for field in MESSAGE_FIELDS {
                if let Some(text) = body.get(field).and_then(|v| v.as_str()) {
                    if !text.trim().is_empty() {
                        return text.to_string();
                    }
                }
            }
        }

        let description = self.to_string();
        if description.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            description
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Persistence(e.to_string())
    }
}
