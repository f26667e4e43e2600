//! Relay Hub Application
//!
//! Runs the WebSocket hub that routes control messages and audio frames
//! between listener and speaker agents.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_relay::config::AppConfig;
use voice_relay::hub::HubServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load_or_default();
    tracing::info!(
        "Starting relay hub on {}:{}",
        config.hub.bind_address,
        config.hub.port
    );

    let server = HubServer::new(config.hub);

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    Ok(())
}
