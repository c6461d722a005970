//! # tether
//!
//! Command-line client: authenticates a realtime session, attaches every
//! feature adapter, and prints what the session sees as JSON lines.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tether_client::{ConnectionState, RealtimeSession, SendOptions};
use tether_core::MessageType;
use tether_core::logging::{LogFormat, init_subscriber};
use tether_features::{Features, TracingAlertSink};
use tether_settings::{load_settings, load_settings_from_path};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Realtime session client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Realtime session client", version)]
struct Cli {
    /// Settings file (default: ~/.tether/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Page origin the endpoint is derived from (overrides settings).
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token.
    #[arg(long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: String,

    /// Authenticated user ID.
    #[arg(long, env = "TETHER_USER")]
    user: String,

    /// Seconds to wait for authentication.
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stay connected and print status, health and inbound events.
    Watch,
    /// Send one chat message and print the server's reply.
    Send {
        /// Recipient user ID.
        #[arg(long)]
        to: String,
        /// Message text.
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    if let Some(base_url) = &cli.base_url {
        settings.connection.base_url.clone_from(base_url);
    }

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);
    // --base-url bypasses the loader's validation
    let endpoint = settings.connection.ws_url().context("Invalid base URL")?;
    info!(endpoint = %endpoint, "starting session");

    let session = RealtimeSession::new(settings);
    session.set_credentials(cli.token.as_str(), cli.user.as_str())?;
    session.connect().await?;
    wait_connected(&session, Duration::from_secs(cli.connect_timeout)).await?;

    let result = match cli.command {
        Command::Watch => watch(&session).await,
        Command::Send { to, text } => send(&session, &to, &text).await,
    };

    session.disconnect().await?;
    session.shutdown().await;
    result
}

async fn wait_connected(session: &RealtimeSession, limit: Duration) -> Result<()> {
    let mut status = session.watch_status();
    let reached = tokio::time::timeout(
        limit,
        status.wait_for(|s| matches!(s.state, ConnectionState::Connected | ConnectionState::Error)),
    )
    .await
    .context("Timed out waiting for authentication")?
    .context("Session stopped before authenticating")?
    .clone();

    if reached.state == ConnectionState::Error {
        bail!(
            "Connection failed: {}",
            reached.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn watch(session: &RealtimeSession) -> Result<()> {
    let features = Features::attach(session, Arc::new(TracingAlertSink));
    let mut events = session.events();
    let mut status = session.watch_status();
    let mut health = session.watch_health();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                println!("{}", json!({ "status": current }));
            }
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = health.borrow_and_update().clone();
                println!("{}", json!({ "health": report }));
            }
            event = events.recv() => match event {
                Ok(envelope) => println!("{}", envelope.to_json()?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!(
        unread = features.notifications.unread_count(),
        online = features.presence.online_users().len(),
        new_matches = features.matching.new_matches().len(),
        "session summary"
    );
    Ok(())
}

async fn send(session: &RealtimeSession, to: &str, text: &str) -> Result<()> {
    let reply = session
        .request(
            MessageType::Message,
            json!({ "recipientId": to, "content": text }),
            SendOptions::default(),
        )
        .await
        .context("Message was not acknowledged")?;
    println!("{}", reply.to_json()?);
    Ok(())
}
