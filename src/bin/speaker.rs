//! Speaker Agent Application
//!
//! Receives relayed audio streams from the hub and paces frames out over
//! UDP to the local playback pipeline.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_relay::config::AppConfig;
use voice_relay::media::{ChannelSinkFactory, UdpPlaybackFeed};
use voice_relay::speaker::SpeakerAgent;

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
    let mut speaker_config = config.speaker.clone();
    if let Some(url) = std::env::args().nth(1) {
        speaker_config.hub_url = url;
    }

    tracing::info!(
        "Starting speaker agent '{}' against {}",
        speaker_config.name,
        speaker_config.hub_url
    );

    let feed = UdpPlaybackFeed::connect(&speaker_config.playback_addr).await?;
    let (factory, playback_rx) = ChannelSinkFactory::new();
    tokio::spawn(feed.run(playback_rx));

    let agent = SpeakerAgent::new(speaker_config, config.transport, Box::new(factory));

    tokio::select! {
        result = agent.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    Ok(())
}
