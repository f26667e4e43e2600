//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Hub configuration
    pub hub: HubConfig,

    /// Transport tuning shared by both agents
    pub transport: TransportConfig,

    /// Listener agent configuration
    pub listener: ListenerConfig,

    /// Speaker agent configuration
    pub speaker: SpeakerConfig,
}

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Bind address for the WebSocket server
    pub bind_address: String,

    /// WebSocket port
    pub port: u16,

    /// Enable CORS on the health endpoint
    pub enable_cors: bool,

    /// Pre-start frame buffer capacity per sender
    pub prestart_buffer_cap: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_HUB_PORT,
            enable_cors: true,
            prestart_buffer_cap: PRESTART_BUFFER_CAP,
        }
    }
}

/// Transport tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Wire frame duration in milliseconds
    pub frame_ms: u64,

    /// Frames coalesced per wire message
    pub coalesce_frames: usize,

    /// Bounded flush delay in milliseconds; defaults to
    /// `frame_ms * coalesce_frames` when absent
    pub coalesce_ms: Option<u64>,

    /// Pending-queue capacity while waiting for an ack
    pub pending_queue_cap: usize,

    /// Jitter buffer capacity in frames
    pub jitter_capacity: usize,

    /// Frames buffered before paced playback starts
    pub warmup_frames: usize,

    /// Fixed reconnect delay in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame_ms: OPUS_FRAME_MS,
            coalesce_frames: COALESCE_FRAMES,
            coalesce_ms: None,
            pending_queue_cap: PENDING_QUEUE_CAP,
            jitter_capacity: MAX_SPEAKER_BUFFER,
            warmup_frames: WARMUP_FRAMES,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
        }
    }
}

impl TransportConfig {
    /// Effective coalesce flush delay
    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(
            self.coalesce_ms
                .unwrap_or(self.frame_ms * self.coalesce_frames as u64),
        )
    }

    /// Playback pacing period
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    /// Fixed reconnect delay
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Listener agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Hub WebSocket URL
    pub hub_url: String,

    /// Agent name, used as the identity prefix
    pub name: String,

    /// Upstream platform client id carried in the announce
    pub client_id: String,

    /// Only relay bursts from this upstream user (None = relay all)
    pub monitor_user: Option<String>,

    /// UDP bind address for the capture feed
    pub capture_bind: String,

    /// Capture silence duration that ends a burst, in milliseconds
    pub silence_timeout_ms: u64,

    /// Whether the relay tunnel starts enabled
    pub tunnel_enabled: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            hub_url: format!("ws://127.0.0.1:{}", DEFAULT_HUB_PORT),
            name: "agentK".to_string(),
            client_id: String::new(),
            monitor_user: None,
            capture_bind: "127.0.0.1:5004".to_string(),
            silence_timeout_ms: SILENCE_TIMEOUT_MS,
            tunnel_enabled: true,
        }
    }
}

/// Speaker agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerConfig {
    /// Hub WebSocket URL
    pub hub_url: String,

    /// Agent name, used as the identity prefix
    pub name: String,

    /// Upstream platform client id carried in the announce
    pub client_id: String,

    /// UDP destination address for the playback feed
    pub playback_addr: String,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            hub_url: format!("ws://127.0.0.1:{}", DEFAULT_HUB_PORT),
            name: "agentJ".to_string(),
            client_id: String::new(),
            playback_addr: "127.0.0.1:5006".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "audio-streamer", "voice-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the config at the default path, falling back to defaults
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }
}
