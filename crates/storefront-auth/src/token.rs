//! Refresh exchange against the identity server
//!
//! POSTs the current refresh token to the issuer's refresh endpoint and
//! returns the new access token plus, when the issuer rotates it, a new
//! refresh token. The token may travel in the JSON body or as a bearer
//! credential, depending on the issuer.
//!
//! This module performs one exchange and nothing else. It never retries:
//! a rejected refresh token is terminal for the session, and the decision
//! belongs to the session manager.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::REFRESH_TOKEN_FIELD;
use crate::error::{Error, Result};

/// Successful refresh response.
///
/// `refresh_token` is absent when the issuer does not rotate refresh tokens;
/// the caller keeps using the previous one.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Where the refresh token goes in the exchange request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTokenPlacement {
    /// `{"refreshToken": "<token>"}` JSON body
    #[default]
    Body,
    /// `Authorization: Bearer <token>`
    Bearer,
}

/// The identity server's refresh endpoint.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenIssuer>`).
pub trait TokenIssuer: Send + Sync {
    /// Endpoint URL, used to recognise the exchange among outbound requests.
    fn endpoint(&self) -> &str;

    /// Exchange `refresh_token` for a new access token.
    ///
    /// 401/403 from the issuer is `Error::InvalidCredentials`.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;
}

/// reqwest-backed issuer client.
pub struct HttpTokenIssuer {
    client: reqwest::Client,
    endpoint: String,
    placement: RefreshTokenPlacement,
}

impl HttpTokenIssuer {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        placement: RefreshTokenPlacement,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            placement,
        }
    }
}

impl TokenIssuer for HttpTokenIssuer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            let request = self.client.post(&self.endpoint);
            let request = match self.placement {
                RefreshTokenPlacement::Body => {
                    let mut body = serde_json::Map::new();
                    body.insert(
                        REFRESH_TOKEN_FIELD.to_string(),
                        serde_json::Value::String(refresh_token.to_string()),
                    );
                    request.json(&body)
                }
                RefreshTokenPlacement::Bearer => request.bearer_auth(refresh_token),
            };

            let response = request
                .send()
                .await
                .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));

                // 401/403 means the refresh token is revoked, expired or reused
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    return Err(Error::InvalidCredentials(format!(
                        "refresh token rejected ({status}): {body}"
                    )));
                }

                return Err(Error::TokenExchange(format!(
                    "token refresh returned {status}: {body}"
                )));
            }

            let token = response
                .json::<TokenResponse>()
                .await
                .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;

            if token.access_token.is_empty() {
                return Err(Error::TokenExchange(
                    "refresh response carried an empty access token".into(),
                ));
            }

            debug!(
                rotated = token.refresh_token.is_some(),
                "refresh exchange succeeded"
            );
            Ok(token)
        })
    }
}
