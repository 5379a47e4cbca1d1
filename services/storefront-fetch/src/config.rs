//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Tokens never live in the TOML; they are kept in the credential file,
//! whose location may be overridden with STOREFRONT_CREDENTIALS_PATH.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use storefront_auth::{DEFAULT_CREDENTIALS_FILE, DEFAULT_REFRESH_TIMEOUT_SECS, RefreshTokenPlacement};
use storefront_session::DEFAULT_MAX_REPLAYS;
use transport::HeaderInjection;

/// Env var overriding `auth.credentials_path`
pub const CREDENTIALS_PATH_ENV: &str = "STOREFRONT_CREDENTIALS_PATH";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub auth: AuthConfig,
}

/// Storefront API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_replays")]
    pub max_replays: u32,
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// Identity server and credential storage settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub refresh_url: String,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default)]
    pub refresh_token_placement: RefreshTokenPlacement,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_replays() -> u32 {
    DEFAULT_MAX_REPLAYS
}

fn default_refresh_timeout() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_SECS
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIALS_FILE)
}

fn require_http_url(field: &str, url: &str) -> common::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http_url("api.base_url", &config.api.base_url)?;
        require_http_url("auth.refresh_url", &config.auth.refresh_url)?;

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }
        if config.api.max_replays == 0 {
            return Err(common::Error::Config(
                "api.max_replays must be greater than 0".into(),
            ));
        }
        if config.auth.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "auth.refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Ok(p) = std::env::var(CREDENTIALS_PATH_ENV)
            && !p.trim().is_empty()
        {
            config.auth.credentials_path = PathBuf::from(p);
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("storefront-fetch.toml")
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AuthConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}
