//! # Huddle Server
//!
//! Real-time chat server: presence, rooms, and message fan-out over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (reads ./huddle.toml if present)
//! huddle
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_HOST=0.0.0.0 huddle
//! ```
//!
//! Clients connect to `ws://<host>:<port>/ws?token=<token>` or send the token
//! as `Authorization: Bearer <token>`.

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        tokens = config.auth.tokens.len(),
        "Starting Huddle server"
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
