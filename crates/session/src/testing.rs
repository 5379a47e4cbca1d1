//! In-memory transport and issuer doubles for protocol tests

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::HeaderMap;
use storefront_auth::{TokenIssuer, TokenResponse};
use tokio::sync::Semaphore;
use transport::{ApiRequest, ApiResponse, Transport, TransportError};

use crate::manager::SessionManager;

/// Base URL `MockApi` resolves relative paths against.
pub const API_BASE: &str = "https://shop.test/api";

pub const ISSUER_ENDPOINT: &str = "https://shop.test/api/auth/refresh";

/// Scripted issuer reply.
pub enum Reply {
    Token {
        access: String,
        refresh: Option<String>,
    },
    Reject,
    Fail,
    Hang,
}

impl Reply {
    pub fn token(access: &str, refresh: Option<&str>) -> Self {
        Reply::Token {
            access: access.to_string(),
            refresh: refresh.map(str::to_string),
        }
    }
}

/// Issuer that answers from a script, optionally held until `release()`.
pub struct ScriptedIssuer {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    gate: Semaphore,
}

impl ScriptedIssuer {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self::with_permits(replies, 1)
    }

    /// Every exchange blocks until `release()` is called.
    pub fn gated(replies: Vec<Reply>) -> Self {
        Self::with_permits(replies, 0)
    }

    fn with_permits(replies: Vec<Reply>, permits: usize) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            gate: Semaphore::new(permits),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented so far, in order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl TokenIssuer for ScriptedIssuer {
    fn endpoint(&self) -> &str {
        ISSUER_ENDPOINT
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = storefront_auth::Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(refresh_token.to_string());
            let _permit = self.gate.acquire().await.unwrap();

            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Reject);
            match reply {
                Reply::Token { access, refresh } => Ok(TokenResponse {
                    access_token: access,
                    refresh_token: refresh,
                }),
                Reply::Reject => Err(storefront_auth::Error::InvalidCredentials(
                    "refresh token rejected (401 Unauthorized)".into(),
                )),
                Reply::Fail => Err(storefront_auth::Error::TokenExchange(
                    "token refresh returned 503".into(),
                )),
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}

/// A transport call as seen by the mock API.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub bearer: Option<String>,
}

/// Mock storefront API: 200 for the one valid access token, 401 otherwise.
///
/// `/boom` answers 500, `/forbidden` answers a plain 403 and `/offline`
/// fails at the transport level, regardless of the token.
pub struct MockApi {
    valid: Mutex<String>,
    calls: Mutex<Vec<Call>>,
}

impl MockApi {
    pub fn new(valid: &str) -> Self {
        Self {
            valid: Mutex::new(valid.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_valid(&self, token: &str) {
        *self.valid.lock().unwrap() = token.to_string();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with(&self, bearer: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.bearer.as_deref() == Some(bearer))
            .count()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }
}

impl Transport for MockApi {
    fn id(&self) -> &str {
        "mock"
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{API_BASE}/{}", path.trim_start_matches('/'))
        }
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(Call {
                path: request.path.clone(),
                bearer: bearer.map(str::to_string),
            });
            tokio::task::yield_now().await;

            let (status, body) = match request.path.as_str() {
                "/offline" => {
                    return Err(TransportError::Connect("connection refused".into()));
                }
                "/boom" => (500, r#"{"error":"internal"}"#.to_string()),
                "/forbidden" => (403, r#"{"error":"admin role required"}"#.to_string()),
                path => {
                    let valid = self.valid.lock().unwrap().clone();
                    if bearer == Some(valid.as_str()) {
                        (200, serde_json::json!({ "path": path }).to_string())
                    } else {
                        (401, r#"{"error":"token expired"}"#.to_string())
                    }
                }
            };
            Ok(ApiResponse {
                status,
                headers: HeaderMap::new(),
                body,
            })
        })
    }
}

/// Wait until `n` requests are queued behind the running exchange.
pub async fn wait_for_pending(session: &SessionManager, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.pending_len() != n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {n} pending, got {}", session.pending_len()));
}
