//! One bounded refresh exchange
//!
//! Runs the issuer call under a timeout and folds every way it can go wrong
//! into an `EndReason`. There is no retry here: a failed exchange ends the
//! session, and retrying a rejected refresh token would only loop.

use std::time::Duration;

use storefront_auth::{TokenIssuer, TokenResponse};
use tracing::{debug, warn};

use crate::events::EndReason;

/// Exchange `refresh_token` at the issuer, bounded by `timeout`.
///
/// A timeout is treated exactly like an explicit rejection: the caller ends
/// the session either way.
pub async fn exchange(
    issuer: &dyn TokenIssuer,
    refresh_token: &str,
    timeout: Duration,
) -> Result<TokenResponse, EndReason> {
    debug!(endpoint = issuer.endpoint(), "presenting refresh token");

    match tokio::time::timeout(timeout, issuer.refresh(refresh_token)).await {
        Ok(Ok(token)) => Ok(token),
        Ok(Err(storefront_auth::Error::InvalidCredentials(msg))) => {
            warn!(error = %msg, "refresh token rejected");
            Err(EndReason::RefreshRejected)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "refresh exchange failed");
            Err(EndReason::RefreshFailed(e.to_string()))
        }
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "refresh exchange timed out"
            );
            Err(EndReason::RefreshTimedOut)
        }
    }
}
