//! FitControl API client
//!
//! Authenticated access to the FitControl REST backend.
//!
//! This crate provides:
//! - Persisted session store holding the user and the JWT pair
//! - HTTP client that attaches the bearer token and refreshes it once on 401
//! - Auth service (login, registration, profile, password flows)
//! - Typed calls for exercises, workout plans, workout logs and video analysis
//! - Error classification and user-facing message extraction

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod fitness;
pub mod models;
pub mod session;

pub use auth::AuthService;
pub use client::{ApiClient, ApiRequest, ApiResponse, Transport, UploadForm};
pub use config::{ClientConfig, Environment};
pub use error::{ApiError, Result};
pub use fitness::FitnessApi;
pub use session::{FileSessionPersistence, Session, SessionStore};
