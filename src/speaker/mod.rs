//! Speaker agent
//!
//! Owns audio playback for one destination: splits coalesced wire messages,
//! drops duplicates by sequence number, and smooths arrival jitter in a
//! bounded buffer before pacing frames to the sink at the frame cadence.

pub mod agent;
pub mod jitter;

pub use agent::SpeakerAgent;
pub use jitter::JitterBuffer;
