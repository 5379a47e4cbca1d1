//! Storefront API client
//!
//! Single-binary CLI over the storefront's authenticated client:
//! 1. Loads config and the persisted credential pair
//! 2. Runs `login`, `logout`, `status`, or one API request
//! 3. Refreshes the access token transparently when the API answers 401
//! 4. Reports a session that ended (refresh rejected or timed out) as "login required"

mod config;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Method;
use std::sync::Arc;
use storefront_auth::{CredentialPair, FileCredentialStore, HttpTokenIssuer};
use storefront_session::{
    AuthenticatedClient, EndReason, SessionConfig, SessionEvent, SessionManager,
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{ApiRequest, HttpTransport};

use crate::config::Config;

/// Call the storefront API with transparent access-token refresh.
#[derive(Parser, Debug)]
#[command(name = "storefront-fetch")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $CONFIG_PATH, then ./storefront-fetch.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a credential pair
    Login {
        access_token: String,
        refresh_token: String,
    },

    /// Clear stored credentials
    Logout,

    /// Show session state as JSON
    Status,

    /// GET a path
    Get { path: String },

    /// DELETE a path
    Delete { path: String },

    /// POST a JSON body to a path
    Post {
        path: String,
        #[arg(value_parser = parse_body)]
        body: Option<serde_json::Value>,
    },

    /// PUT a JSON body to a path
    Put {
        path: String,
        #[arg(value_parser = parse_body)]
        body: Option<serde_json::Value>,
    },

    /// PATCH a path with a JSON body
    Patch {
        path: String,
        #[arg(value_parser = parse_body)]
        body: Option<serde_json::Value>,
    },
}

/// Everything a command needs, wired from config
struct App {
    session: Arc<SessionManager>,
    client: AuthenticatedClient,
    credentials_path: std::path::PathBuf,
}

fn parse_body(raw: &str) -> std::result::Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("request body is not valid JSON: {e}"))
}

fn api_request(method: Method, path: String, body: Option<serde_json::Value>) -> ApiRequest {
    let request = ApiRequest::new(method, path);
    match body {
        Some(body) => request.with_body(body),
        None => request,
    }
}

/// Wire store, issuer, session and transport from config.
fn build_app(config: &Config) -> Result<App> {
    let store = FileCredentialStore::load(config.auth.credentials_path.clone()).with_context(
        || {
            format!(
                "failed to load credentials from {}",
                config.auth.credentials_path.display()
            )
        },
    )?;

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let issuer = HttpTokenIssuer::new(
        http.clone(),
        &config.auth.refresh_url,
        config.auth.refresh_token_placement,
    );
    let session = SessionManager::new(
        Arc::new(store),
        Arc::new(issuer),
        SessionConfig {
            refresh_timeout: config.auth.refresh_timeout(),
            ..SessionConfig::default()
        },
    );

    let transport = HttpTransport::new(
        http,
        &config.api.base_url,
        &config.api.headers,
        config.api.timeout(),
    );
    let client = AuthenticatedClient::new(Arc::new(transport), session.clone())
        .with_max_replays(config.api.max_replays);

    Ok(App {
        session,
        client,
        credentials_path: config.auth.credentials_path.clone(),
    })
}

/// Run one command and return what goes to stdout.
async fn run(app: &App, command: Command) -> Result<String> {
    let request = match command {
        Command::Login {
            access_token,
            refresh_token,
        } => {
            app.session
                .login(CredentialPair::new(access_token, refresh_token))
                .context("failed to store credentials")?;
            return Ok("logged in".to_string());
        }
        Command::Logout => {
            app.session.logout().context("failed to clear credentials")?;
            return Ok("logged out".to_string());
        }
        Command::Status => {
            return Ok(serde_json::json!({
                "state": app.session.state().label(),
                "generation": app.session.generation(),
                "credentials_path": app.credentials_path.display().to_string(),
            })
            .to_string());
        }
        Command::Get { path } => api_request(Method::GET, path, None),
        Command::Delete { path } => api_request(Method::DELETE, path, None),
        Command::Post { path, body } => api_request(Method::POST, path, body),
        Command::Put { path, body } => api_request(Method::PUT, path, body),
        Command::Patch { path, body } => api_request(Method::PATCH, path, body),
    };

    let response = app
        .client
        .fetch(&request)
        .await
        .with_context(|| format!("{} {} failed", request.method, request.path))?;
    Ok(response.body)
}

/// Log buffered session events. Returns the reason of the last session end.
fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) -> Option<EndReason> {
    let mut ended = None;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Ended { generation, reason }) => {
                warn!(
                    generation,
                    reason = reason.label(),
                    "session ended, login required"
                );
                ended = Some(reason);
            }
            Ok(SessionEvent::Refreshed { generation }) => {
                info!(generation, "access token refreshed");
            }
            Ok(SessionEvent::LoggedIn { generation }) => {
                info!(generation, "credentials installed");
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "session events dropped");
            }
            Err(_) => return ended,
        }
    }
}

/// Tell the user to log in again when a failed command ended the session.
fn login_required_on_end(result: Result<String>, ended: Option<EndReason>) -> Result<String> {
    match (result, ended) {
        (Err(e), Some(reason)) if reason != EndReason::LoggedOut => Err(e.context(format!(
            "session ended ({}), login required",
            reason.label()
        ))),
        (result, _) => result,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support.
    // stdout carries response bodies, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = if cli.metrics {
        Some(metrics::install_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        refresh_url = %config.auth.refresh_url,
        headers = config.api.headers.len(),
        max_replays = config.api.max_replays,
        "configuration loaded"
    );

    let app = build_app(&config)?;
    let mut events = app.session.subscribe();

    let result = run(&app, cli.command).await;
    let ended = report_session_events(&mut events);

    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }

    println!("{}", login_required_on_end(result, ended)?);
    Ok(())
}
