//! Client configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::RequestKind;
use crate::error::{ApiError, Result};

/// Backend used by development builds (host loopback as seen from the Android emulator).
pub const DEVELOPMENT_BASE_URL: &str = "http://10.0.2.2:8000/api";

/// Production backend.
pub const PRODUCTION_BASE_URL: &str = "https://api.fitcontrol.com/api";

/// Token refresh endpoint, relative to the base URL.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh/";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Deployment environment selecting the default backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Base URL for this environment.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Environment::Development => DEVELOPMENT_BASE_URL,
            Environment::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        }
    }
}

impl FromStr for Environment {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Environment::Development),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(ApiError::Config(format!("Unknown environment: {}", other))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// API client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Environment the base URL was derived from.
    pub environment: Environment,

    /// Backend base URL, without trailing slash.
    pub base_url: String,

    /// Time budget for interactive (JSON) requests.
    pub timeout: Duration,

    /// Time budget for multipart uploads.
    pub upload_timeout: Duration,

    /// Token refresh endpoint path.
    pub refresh_path: String,

    /// User-Agent header value.
    pub user_agent: String,
}

impl ClientConfig {
    /// Default configuration for an environment.
    pub fn for_environment(environment: Environment) -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Self {
            environment,
            base_url: environment.default_base_url().to_string(),
            timeout,
            upload_timeout: timeout * 2,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            user_agent: concat!("fitcontrol-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `FITCONTROL_ENV` picks the environment, `FITCONTROL_API_URL` overrides
    /// the base URL. Timeouts come from `FITCONTROL_TIMEOUT_SECS` and
    /// `FITCONTROL_UPLOAD_TIMEOUT_SECS`; the upload budget defaults to twice
    /// the interactive one.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = match lookup("FITCONTROL_ENV") {
            Some(value) => value.parse()?,
            None => Environment::default(),
        };

        let mut config = Self::for_environment(environment);

        if let Some(url) = lookup("FITCONTROL_API_URL") {
            config = config.with_base_url(&url);
        }

        let timeout_secs: u64 = lookup("FITCONTROL_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let upload_timeout_secs: u64 = lookup("FITCONTROL_UPLOAD_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(timeout_secs.saturating_mul(2));

        config.timeout = Duration::from_secs(timeout_secs);
        config.upload_timeout = Duration::from_secs(upload_timeout_secs);

        Ok(config)
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Absolute URL for an API path. Absolute inputs are returned unchanged.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Time budget for a request of the given kind.
    pub fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Interactive => self.timeout,
            RequestKind::Upload => self.upload_timeout,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}
