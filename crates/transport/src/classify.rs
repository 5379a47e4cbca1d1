//! Response classification for the authenticated client
//!
//! Separates authorization failures (which start the refresh protocol) from
//! every other HTTP error (which propagates to the caller untouched). Some
//! storefront backends answer an expired token with 403 instead of 401; those
//! are recognised by the body markers below.

/// Body markers that turn a 403 into an authorization failure.
const EXPIRED_TOKEN_PATTERNS: &[&str] = &["token expired", "jwt expired", "invalid_token"];

/// How the dispatcher should treat a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// Below 400, handed back to the caller
    Success,
    /// Access token rejected, delegate to the session manager
    Unauthorized,
    /// Any other HTTP error, no session impact
    HttpError,
}

/// Classify a response by HTTP status and body.
pub fn classify_status(status: u16, body: &str) -> ResponseClass {
    match status {
        401 => ResponseClass::Unauthorized,
        403 if mentions_expired_token(body) => ResponseClass::Unauthorized,
        400.. => ResponseClass::HttpError,
        _ => ResponseClass::Success,
    }
}

fn mentions_expired_token(body: &str) -> bool {
    let lower = body.to_lowercase();
    EXPIRED_TOKEN_PATTERNS.iter().any(|p| lower.contains(p))
}
