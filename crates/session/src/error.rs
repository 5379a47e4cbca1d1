//! Error types for the authenticated client

use transport::TransportError;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors surfaced to callers of the authenticated client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network, DNS or timeout failure. No session impact.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Still unauthorized after the session protocol ran its course.
    #[error("unauthorized ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    /// Any other HTTP error. No session impact.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The refresh exchange itself was reported as unauthorized.
    #[error("refresh exchange failed: {0}")]
    RefreshExchange(String),

    /// The session ended; only a new login recovers.
    #[error("session expired, login required")]
    SessionExpired,

    #[error("credential store error: {0}")]
    Credential(String),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl Error {
    /// Build an `Http` error from a non-authorization failure.
    pub fn from_status(status: u16, body: &str) -> Self {
        Error::Http {
            status,
            body: truncate_body(body),
        }
    }

    /// Build an `Unauthorized` error from the last 401-class response.
    pub fn unauthorized(status: u16, body: &str) -> Self {
        Error::Unauthorized {
            status,
            body: truncate_body(body),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired)
    }
}

impl From<storefront_auth::Error> for Error {
    fn from(e: storefront_auth::Error) -> Self {
        Error::Credential(e.to_string())
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
