//! Shared types for the storefront client crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
