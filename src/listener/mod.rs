//! Listener agent
//!
//! Owns audio capture for one upstream source: gates outgoing frames behind
//! the speaker's ack, coalesces small frames into larger wire messages, and
//! streams them to the hub.

pub mod agent;
pub mod pending;

pub use agent::ListenerAgent;
pub use pending::{PendingQueue, PushOutcome};
