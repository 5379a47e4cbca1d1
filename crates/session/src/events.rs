//! Session lifecycle events
//!
//! Broadcast to subscribers (e.g. the UI layer routing to a login screen).
//! `Ended` fires once per session teardown, never once per failed request.

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The issuer rejected the refresh token (401/403)
    RefreshRejected,
    /// The refresh exchange exceeded its timeout
    RefreshTimedOut,
    /// Any other refresh failure (network, 5xx, malformed response)
    RefreshFailed(String),
    /// A 401 arrived but the store held no pair to refresh
    MissingCredentials,
    /// Explicit logout
    LoggedOut,
}

impl EndReason {
    /// Label for metrics and logging.
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::RefreshRejected => "refresh_rejected",
            EndReason::RefreshTimedOut => "refresh_timed_out",
            EndReason::RefreshFailed(_) => "refresh_failed",
            EndReason::MissingCredentials => "missing_credentials",
            EndReason::LoggedOut => "logged_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new pair was installed by login
    LoggedIn { generation: u64 },
    /// A refresh exchange succeeded
    Refreshed { generation: u64 },
    /// The session is over; the application should ask for a new login
    Ended { generation: u64, reason: EndReason },
}

impl SessionEvent {
    pub fn is_session_end(&self) -> bool {
        matches!(self, SessionEvent::Ended { .. })
    }
}
