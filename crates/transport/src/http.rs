//! reqwest-backed transport
//!
//! Joins request paths onto the configured base URL, injects static headers
//! from config, attaches the bearer token it is handed and applies a
//! per-request timeout. Responses are returned verbatim, including 4xx/5xx.

use crate::{ApiRequest, ApiResponse, Result, Transport, TransportError};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Production transport over a shared `reqwest::Client`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport. Invalid injection rules are skipped with a warning,
    /// and `Authorization` is never injected from config.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        headers: &[HeaderInjection],
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            default_headers: build_default_headers(headers),
            timeout,
        }
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url_for(&request.path);

            let mut headers = self.default_headers.clone();
            for (name, value) in &request.headers {
                headers.insert(name.clone(), value.clone());
            }
            // Only the token handed to this send may authorize it
            if headers.remove(AUTHORIZATION).is_some() {
                warn!(path = %request.path, "dropping authorization header set on the request");
            }

            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .headers(headers)
                .timeout(self.timeout);
            if let Some(token) = bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| map_send_error(&url, e))?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Request(format!("reading body from {url}: {e}")))?;

            debug!(method = %request.method, url = %url, status, "response received");
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}

fn map_send_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(format!("{url}: {e}"))
    } else if e.is_connect() {
        TransportError::Connect(format!("{url}: {e}"))
    } else if e.is_builder() {
        TransportError::InvalidRequest(format!("{url}: {e}"))
    } else {
        TransportError::Request(format!("{url}: {e}"))
    }
}

fn build_default_headers(rules: &[HeaderInjection]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for injection in rules {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == AUTHORIZATION {
            warn!(header = %injection.name, "refusing to inject authorization header from config");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
    headers
}
