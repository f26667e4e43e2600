//! Listener Agent Application
//!
//! Receives captured Opus frames over UDP, gates and coalesces them per
//! source, and streams them to the relay hub.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_relay::config::AppConfig;
use voice_relay::listener::ListenerAgent;
use voice_relay::media::UdpCaptureFeed;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load_or_default();

    // Hub URL override from args for quick local runs
    let mut listener_config = config.listener.clone();
    if let Some(url) = std::env::args().nth(1) {
        listener_config.hub_url = url;
    }

    tracing::info!(
        "Starting listener agent '{}' against {}",
        listener_config.name,
        listener_config.hub_url
    );

    let monitored = listener_config
        .monitor_user
        .clone()
        .unwrap_or_else(|| "local".to_string());
    let feed = UdpCaptureFeed::bind(
        &listener_config.capture_bind,
        monitored,
        Duration::from_millis(listener_config.silence_timeout_ms),
    )
    .await?;

    let (capture_tx, capture_rx) = mpsc::channel(256);
    tokio::spawn(feed.run(capture_tx));

    let agent = ListenerAgent::new(listener_config, config.transport);

    tokio::select! {
        result = agent.run(capture_rx) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    Ok(())
}
