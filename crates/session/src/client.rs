//! Authenticated request dispatch
//!
//! `AuthenticatedClient::fetch` attaches the current access token, sends the
//! request, and on a 401-class response hands the request to the session
//! manager instead of retrying on its own. Transport failures and other HTTP
//! errors go straight back to the caller with no session impact.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use transport::{ApiRequest, ApiResponse, ResponseClass, Transport, classify_status};

use crate::error::{Error, Result};
use crate::manager::SessionManager;

/// Replays allowed per request before the last 401 is returned as-is.
///
/// One replay covers an ordinary refresh; the second covers a credential
/// rotation that lands right after the first.
pub const DEFAULT_MAX_REPLAYS: u32 = 2;

/// Stateless dispatcher over a transport and a shared session.
#[derive(Clone)]
pub struct AuthenticatedClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    max_replays: u32,
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

impl AuthenticatedClient {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionManager>) -> Self {
        Self {
            transport,
            session,
            max_replays: DEFAULT_MAX_REPLAYS,
        }
    }

    pub fn with_max_replays(mut self, max_replays: u32) -> Self {
        self.max_replays = max_replays;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Send `request` with the current access token.
    ///
    /// A 401 (or a 403 carrying an expired-token marker) is delegated to the
    /// session manager, and the request is replayed with whatever token it
    /// resolves to. Resolves to the final response, or to the error that
    /// ended the attempt.
    #[instrument(
        skip_all,
        fields(request_id = %new_request_id(), method = %request.method, path = %request.path)
    )]
    pub async fn fetch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut grant = self.session.current_grant();
        let mut replays = 0;

        loop {
            let bearer = grant.as_ref().map(|g| g.access_token.as_str());
            let response = self.transport.send(request, bearer).await?;

            match classify_status(response.status, &response.body) {
                ResponseClass::Success => return Ok(response),
                ResponseClass::HttpError => {
                    debug!(status = response.status, "request failed");
                    return Err(Error::from_status(response.status, &response.body));
                }
                ResponseClass::Unauthorized => {
                    if self
                        .session
                        .is_refresh_exchange(&self.transport.url_for(&request.path))
                    {
                        return Err(Error::unauthorized(response.status, &response.body));
                    }
                    if replays >= self.max_replays {
                        warn!(
                            status = response.status,
                            replays, "still unauthorized after replay limit"
                        );
                        return Err(Error::unauthorized(response.status, &response.body));
                    }

                    let failed_generation = grant.as_ref().map(|g| g.generation);
                    debug!(
                        status = response.status,
                        generation = ?failed_generation,
                        "unauthorized, handing to session"
                    );
                    let renewed = self
                        .session
                        .handle_unauthorized(request, failed_generation)
                        .await?;
                    debug!(generation = renewed.generation, "replaying");
                    grant = Some(renewed);
                    replays += 1;
                }
            }
        }
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.fetch(&ApiRequest::get(path)).await?;
        response
            .json()
            .map_err(|e| Error::Decode(format!("GET {path}: {e}")))
    }

    /// POST a JSON body to `path` and decode the JSON reply.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let response = self.fetch(&ApiRequest::post(path, body)).await?;
        response
            .json()
            .map_err(|e| Error::Decode(format!("POST {path}: {e}")))
    }
}
