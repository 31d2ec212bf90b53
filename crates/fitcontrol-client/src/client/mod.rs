//! Authenticated HTTP client.
//!
//! [`ApiClient`] attaches the session's bearer token to every call and
//! recovers from an expired access token with a single refresh-and-retry
//! cycle. The wire itself sits behind the [`Transport`] trait.

mod api;
#[cfg(test)]
pub(crate) mod mock;
mod request;
mod transport;

pub use api::{ApiClient, MAX_REFRESH_ATTEMPTS};
pub use request::{
    mime_for_path, query_pairs, ApiRequest, FilePart, RequestBody, RequestKind, UploadForm,
};
pub use transport::{ApiResponse, PreparedRequest, ReqwestTransport, Transport};
