//! Session state machine and single-flight refresh
//!
//! The manager owns the session state and the queue of requests blocked on a
//! refresh. The credential store stays the single source of truth for token
//! data; the manager reads and writes it inside its transitions.
//!
//! Transitions:
//! - Authenticated → Refreshing (first 401 for the current generation; one exchange starts)
//! - Refreshing → Refreshing (later 401s queue behind the running exchange)
//! - Refreshing → Authenticated (exchange succeeded; queue released with the new token)
//! - Refreshing → Unauthenticated (exchange failed; store cleared; queue fails)
//! - any → Authenticated (login)
//! - any → Unauthenticated (logout)
//!
//! Every transition runs under a synchronous lock with no `.await` inside, so
//! checking the state, enqueueing a caller and starting the exchange happen
//! as one step relative to other callers. The only suspension points are the
//! exchange itself and each caller's wait for its outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use storefront_auth::{CredentialPair, CredentialStore, DEFAULT_REFRESH_TIMEOUT_SECS, TokenIssuer};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use transport::ApiRequest;

use crate::error::{Error, Result};
use crate::events::{EndReason, SessionEvent};
use crate::refresh;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Refreshing,
    Unauthenticated,
}

impl SessionState {
    /// State label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
            SessionState::Unauthenticated => "unauthenticated",
        }
    }
}

/// An access token together with the credential generation it belongs to.
///
/// The generation increases every time a new pair is installed. A 401 for an
/// older generation means the token was already replaced, so no new exchange
/// is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub generation: u64,
    pub access_token: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on one refresh exchange
    pub refresh_timeout: Duration,
    /// Buffered events per subscriber before slow receivers lag
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            event_capacity: 16,
        }
    }
}

/// What a queued caller is woken with.
enum Outcome {
    Refreshed(AccessGrant),
    Expired,
}

/// A request suspended until the running exchange finishes. The request
/// itself stays with its caller, which replays it with the new grant.
struct Waiter {
    ticket: u64,
    method: String,
    path: String,
    tx: oneshot::Sender<Outcome>,
}

struct Inner {
    state: SessionState,
    generation: u64,
    waiters: Vec<Waiter>,
    next_ticket: u64,
}

/// Owner of the refresh protocol. Shared as `Arc<SessionManager>`.
pub struct SessionManager {
    inner: Mutex<Inner>,
    store: Arc<dyn CredentialStore>,
    issuer: Arc<dyn TokenIssuer>,
    refresh_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager over `store`. Starts `Authenticated` when the store
    /// already holds a pair, `Unauthenticated` otherwise.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        issuer: Arc<dyn TokenIssuer>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (state, generation) = match store.get() {
            Some(_) => (SessionState::Authenticated, 1),
            None => (SessionState::Unauthenticated, 0),
        };
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!(state = state.label(), "session manager initialized");

        Arc::new(Self {
            inner: Mutex::new(Inner {
                state,
                generation,
                waiters: Vec::new(),
                next_ticket: 0,
            }),
            store,
            issuer,
            refresh_timeout: config.refresh_timeout,
            events,
        })
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Number of requests waiting on the running exchange.
    pub fn pending_len(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Subscribe to session events. `SessionEvent::Ended` is the logout signal.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Token to attach to the next outbound request, if any.
    pub fn current_grant(&self) -> Option<AccessGrant> {
        let inner = self.lock();
        self.grant_locked(&inner)
    }

    /// Whether the absolute `url` is the issuer's refresh endpoint. Relative
    /// paths never match; resolve them with `Transport::url_for` first.
    pub fn is_refresh_exchange(&self, url: &str) -> bool {
        url.trim_end_matches('/') == self.issuer.endpoint().trim_end_matches('/')
    }

    /// Handle a 401 for `request`, which was sent with the token of
    /// `failed_generation` (`None` when it went out unauthenticated).
    ///
    /// Resolves to the grant to replay with, or `SessionExpired`. The first
    /// caller for the current generation starts the one exchange; everyone
    /// else queues behind it. Dropping the returned future removes the caller
    /// from the queue without disturbing the others.
    pub async fn handle_unauthorized(
        self: &Arc<Self>,
        request: &ApiRequest,
        failed_generation: Option<u64>,
    ) -> Result<AccessGrant> {
        if self.is_refresh_exchange(&request.path) {
            warn!(path = %request.path, "refresh exchange reported unauthorized, not queueing");
            return Err(Error::RefreshExchange(format!(
                "{} {} was rejected",
                request.method, request.path
            )));
        }

        let (ticket, rx, exchange) = {
            let mut inner = self.lock();
            let mut exchange = None;

            let state = inner.state;
            match state {
                SessionState::Unauthenticated => {
                    debug!(path = %request.path, "401 while unauthenticated");
                    return Err(Error::SessionExpired);
                }
                SessionState::Authenticated => {
                    let superseded = failed_generation.is_none_or(|g| g < inner.generation);
                    if superseded && let Some(grant) = self.grant_locked(&inner) {
                        debug!(
                            path = %request.path,
                            generation = grant.generation,
                            "credentials already replaced, replaying without refresh"
                        );
                        return Ok(grant);
                    }

                    let Some(pair) = self.store.get() else {
                        let generation = inner.generation;
                        if let Err(e) =
                            self.end_session_locked(&mut inner, EndReason::MissingCredentials)
                        {
                            warn!(generation, error = %e, "failed to clear credentials");
                        }
                        return Err(Error::SessionExpired);
                    };

                    inner.state = SessionState::Refreshing;
                    exchange = Some((inner.generation, Secret::new(pair.refresh_token)));
                }
                SessionState::Refreshing => {}
            }

            let (tx, rx) = oneshot::channel();
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.waiters.push(Waiter {
                ticket,
                method: request.method.to_string(),
                path: request.path.clone(),
                tx,
            });
            debug!(
                ticket,
                path = %request.path,
                pending = inner.waiters.len(),
                "request queued behind refresh"
            );
            metrics::counter!("session_requests_queued_total").increment(1);
            metrics::gauge!("session_pending_requests").set(inner.waiters.len() as f64);

            (ticket, rx, exchange)
        };

        if let Some((generation, refresh_token)) = exchange {
            self.spawn_exchange(generation, refresh_token);
        }

        let _queued = QueuedRequest {
            manager: self,
            ticket,
        };
        match rx.await {
            Ok(Outcome::Refreshed(grant)) => Ok(grant),
            Ok(Outcome::Expired) | Err(_) => Err(Error::SessionExpired),
        }
    }

    /// Install a freshly issued pair and reset the session to `Authenticated`.
    ///
    /// Requests queued behind a running exchange are released with the new
    /// token; that exchange's result is discarded when it arrives. The
    /// transition happens even if persisting fails, in which case the error
    /// is returned after the pair is in effect for this process.
    pub fn login(&self, pair: CredentialPair) -> Result<()> {
        let mut inner = self.lock();
        let persisted = self.store.set(pair.clone());
        let grant = self.install_locked(&mut inner, pair);
        self.release_waiters(&mut inner, &grant);
        info!(generation = grant.generation, "logged in");
        let _ = self.events.send(SessionEvent::LoggedIn {
            generation: grant.generation,
        });
        persisted.map_err(Error::from)
    }

    /// End the session: clear the store, fail queued requests, notify once.
    pub fn logout(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == SessionState::Unauthenticated {
            return self.store.clear().map_err(Error::from);
        }
        self.end_session_locked(&mut inner, EndReason::LoggedOut)
            .map_err(Error::from)
    }

    fn spawn_exchange(self: &Arc<Self>, generation: u64, refresh_token: Secret<String>) {
        info!(generation, "starting refresh exchange");
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let result = refresh::exchange(
                manager.issuer.as_ref(),
                refresh_token.as_str(),
                manager.refresh_timeout,
            )
            .await;
            manager.refresh_completed(generation, refresh_token, result);
        });
    }

    /// Apply the outcome of the exchange started for `generation`.
    fn refresh_completed(
        &self,
        generation: u64,
        previous_refresh: Secret<String>,
        result: std::result::Result<storefront_auth::TokenResponse, EndReason>,
    ) {
        let mut inner = self.lock();
        if inner.state != SessionState::Refreshing || inner.generation != generation {
            debug!(
                generation,
                current = inner.generation,
                state = inner.state.label(),
                "discarding stale refresh result"
            );
            return;
        }

        match result {
            Ok(token) => {
                let refresh_token = token
                    .refresh_token
                    .unwrap_or_else(|| previous_refresh.expose().clone());
                let pair = CredentialPair::new(token.access_token, refresh_token);
                if let Err(e) = self.store.set(pair.clone()) {
                    warn!(generation, error = %e, "failed to persist refreshed credentials");
                }
                let grant = self.install_locked(&mut inner, pair);
                let replaying = self.release_waiters(&mut inner, &grant);
                info!(generation = grant.generation, replaying, "refresh succeeded");
                metrics::counter!("session_refresh_total", "outcome" => "success").increment(1);
                let _ = self.events.send(SessionEvent::Refreshed {
                    generation: grant.generation,
                });
            }
            Err(reason) => {
                metrics::counter!("session_refresh_total", "outcome" => reason.label())
                    .increment(1);
                if let Err(e) = self.end_session_locked(&mut inner, reason) {
                    warn!(generation, error = %e, "failed to clear credentials");
                }
            }
        }
    }

    /// Bump the generation and mark the session authenticated. The caller
    /// has already written `pair` to the store.
    fn install_locked(&self, inner: &mut Inner, pair: CredentialPair) -> AccessGrant {
        inner.generation += 1;
        inner.state = SessionState::Authenticated;
        AccessGrant {
            generation: inner.generation,
            access_token: Secret::new(pair.access_token),
        }
    }

    /// Wake every queued caller with `grant`. Returns how many were woken.
    fn release_waiters(&self, inner: &mut Inner, grant: &AccessGrant) -> usize {
        let waiters = std::mem::take(&mut inner.waiters);
        let count = waiters.len();
        for waiter in waiters {
            debug!(
                ticket = waiter.ticket,
                method = %waiter.method,
                path = %waiter.path,
                "releasing request for replay"
            );
            // A closed receiver means the caller went away; nothing to do
            let _ = waiter.tx.send(Outcome::Refreshed(grant.clone()));
        }
        metrics::counter!("session_requests_replayed_total").increment(count as u64);
        metrics::gauge!("session_pending_requests").set(0.0);
        count
    }

    /// Tear the session down. The state change, queue failure and the single
    /// `Ended` event happen even when clearing the store fails; that error is
    /// returned for the caller to report.
    fn end_session_locked(
        &self,
        inner: &mut Inner,
        reason: EndReason,
    ) -> storefront_auth::Result<()> {
        let cleared = self.store.clear();
        inner.state = SessionState::Unauthenticated;

        let waiters = std::mem::take(&mut inner.waiters);
        let failed = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Outcome::Expired);
        }

        warn!(
            generation = inner.generation,
            reason = reason.label(),
            failed,
            "session ended"
        );
        metrics::counter!("session_ended_total", "reason" => reason.label()).increment(1);
        metrics::gauge!("session_pending_requests").set(0.0);
        let _ = self.events.send(SessionEvent::Ended {
            generation: inner.generation,
            reason,
        });
        cleared
    }

    fn grant_locked(&self, inner: &Inner) -> Option<AccessGrant> {
        if inner.state == SessionState::Unauthenticated {
            return None;
        }
        self.store.get().map(|pair| AccessGrant {
            generation: inner.generation,
            access_token: Secret::new(pair.access_token),
        })
    }

    /// Drop a queued caller that stopped waiting.
    fn cancel(&self, ticket: u64) {
        let mut inner = self.lock();
        let before = inner.waiters.len();
        inner.waiters.retain(|w| w.ticket != ticket);
        if inner.waiters.len() < before {
            debug!(ticket, pending = inner.waiters.len(), "queued request cancelled");
            metrics::counter!("session_requests_cancelled_total").increment(1);
            metrics::gauge!("session_pending_requests").set(inner.waiters.len() as f64);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its ticket from the queue when the waiting caller is dropped.
/// After a normal wake-up the ticket is already gone and this is a no-op.
struct QueuedRequest<'a> {
    manager: &'a SessionManager,
    ticket: u64,
}

impl Drop for QueuedRequest<'_> {
    fn drop(&mut self) {
        self.manager.cancel(self.ticket);
    }
}
