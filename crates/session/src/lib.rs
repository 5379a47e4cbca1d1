//! Session protocol for the storefront's authenticated HTTP client
//!
//! Attaches the current access token to outbound requests, detects its
//! expiry through 401 responses, and exchanges the refresh token for a new
//! access token exactly once per credential generation no matter how many
//! requests fail at the same time. Blocked requests are queued and replayed
//! once the exchange succeeds, or all fail with `SessionExpired` when it
//! doesn't.
//!
//! Session lifecycle:
//! 1. Login stores a credential pair → `Authenticated`
//! 2. A request gets a 401 → `Refreshing`, one exchange starts, the request queues
//! 3. Further 401s while refreshing → queued behind the same exchange
//! 4. Exchange succeeds → new pair stored, queue replayed, `Authenticated`
//! 5. Exchange fails or times out → store cleared, queue fails, `Unauthenticated`,
//!    one `SessionEvent::Ended` broadcast
//! 6. A new login resets the session to `Authenticated`

pub mod client;
pub mod error;
pub mod events;
pub mod manager;
pub mod refresh;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{AuthenticatedClient, DEFAULT_MAX_REPLAYS};
pub use error::{Error, Result};
pub use events::{EndReason, SessionEvent};
pub use manager::{AccessGrant, SessionConfig, SessionManager, SessionState};
