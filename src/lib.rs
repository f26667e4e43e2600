//! # Voice Relay
//!
//! Low-latency relay for a one-way stream of opaque Opus frames between two
//! remote endpoints.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐                 ┌──────────────────────────────┐
//! │         LISTENER             │                 │          SPEAKER             │
//! │  ┌────────────────────────┐  │                 │  ┌────────────────────────┐  │
//! │  │  Capture pipeline      │  │                 │  │  Playback sink         │  │
//! │  │  (external, opaque     │  │                 │  │  (external, opaque     │  │
//! │  │   frame blobs)         │  │                 │  │   frame blobs)         │  │
//! │  └──────────┬─────────────┘  │                 │  └──────────▲─────────────┘  │
//! │             ▼                │                 │             │ paced 20ms     │
//! │  ┌────────────────────────┐  │                 │  ┌──────────┴─────────────┐  │
//! │  │  PendingQueue          │  │                 │  │  JitterBuffer          │  │
//! │  │  (ack gate + coalesce) │  │                 │  │  (dedupe + warm-up)    │  │
//! │  └──────────┬─────────────┘  │                 │  └──────────▲─────────────┘  │
//! │             ▼                │                 │             │ split          │
//! │     [seq|len|payload]*       │                 │     [seq|len|payload]*       │
//! └─────────────┬────────────────┘                 └─────────────┬────────────────┘
//!               │ WebSocket                                      │ WebSocket
//!               ▼                                                │
//! ┌──────────────────────────────────────────────────────────────┴───────────────┐
//! │                                   HUB                                        │
//! │   Registry: identity -> peer record, role, pre-start frame buffers.          │
//! │   Routes control messages and binary frames; never interprets audio.         │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod listener;
pub mod media;
pub mod protocol;
pub mod speaker;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Duration of one Opus frame in milliseconds
    pub const OPUS_FRAME_MS: u64 = 20;

    /// Number of frames coalesced into one wire message before flushing
    pub const COALESCE_FRAMES: usize = 6;

    /// Frames buffered before paced playback starts
    pub const WARMUP_FRAMES: usize = 6;

    /// Jitter buffer capacity in frames (drop-oldest beyond this)
    pub const MAX_SPEAKER_BUFFER: usize = 5000;

    /// Listener pending-queue capacity in frames (drop-incoming beyond this)
    pub const PENDING_QUEUE_CAP: usize = 1000;

    /// Hub pre-start buffer capacity per sender (drop-oldest beyond this)
    pub const PRESTART_BUFFER_CAP: usize = 1000;

    /// Fixed delay before an agent reconnects to the hub
    pub const RECONNECT_DELAY_MS: u64 = 1000;

    /// Capture feed silence duration that ends a burst
    pub const SILENCE_TIMEOUT_MS: u64 = 2000;

    /// Default hub WebSocket port
    pub const DEFAULT_HUB_PORT: u16 = 8080;
}
