//! Transport abstraction for outbound storefront API calls
//!
//! Defines the `Transport` trait that decouples the session protocol from the
//! HTTP stack. `HttpTransport` is the reqwest-backed implementation used in
//! production; tests substitute scripted transports that never touch the
//! network.
//!
//! A transport only moves bytes. It attaches the bearer token it is handed
//! and reports the status it got back. Deciding what a 401 means belongs to
//! the session layer (see `classify_status`).

pub mod classify;
pub mod http;
pub mod request;

pub use classify::{ResponseClass, classify_status};
pub use http::{HeaderInjection, HttpTransport};
pub use request::{ApiRequest, ApiResponse};

use std::future::Future;
use std::pin::Pin;

/// Transport-level failures. The request never produced an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Abstraction over the HTTP stack used by the authenticated client.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http")
    fn id(&self) -> &str;

    /// Absolute URL a request with `path` is sent to.
    fn url_for(&self, path: &str) -> String;

    /// Send `request`, attaching `Authorization: Bearer <bearer>` when a token
    /// is given. Any HTTP status, including 401, is a successful send.
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;
}
