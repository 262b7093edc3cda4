//! # Huddle Server
//!
//! Realtime presence and message broadcast for group chat.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Pick up ./huddle.toml, /etc/huddle/huddle.toml or ~/.config/huddle/huddle.toml
//! huddle
//!
//! # Override with environment variables
//! HUDDLE__PORT=8080 HUDDLE__AUTH__JWT_SECRET=change-me huddle
//! ```

use anyhow::Result;
use huddle_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
