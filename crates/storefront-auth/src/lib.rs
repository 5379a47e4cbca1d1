//! Storefront credential storage and refresh exchange
//!
//! Holds the access/refresh credential pair and talks to the identity
//! server's refresh endpoint. This crate knows nothing about concurrency or
//! request replay; the session crate coordinates both.
//!
//! Credential flow:
//! 1. Login produces a `CredentialPair`, persisted via `CredentialStore::set()`
//! 2. Every outbound call reads the access token via `CredentialStore::get()`
//! 3. On a 401 the session manager calls `TokenIssuer::refresh()` once
//! 4. The new pair replaces the old one; on failure `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Error, Result};
pub use token::{HttpTokenIssuer, RefreshTokenPlacement, TokenIssuer, TokenResponse};
