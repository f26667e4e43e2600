//! Routing hub
//!
//! The hub never interprets audio. It keeps a registry of connected peers,
//! forwards control messages, and buffers binary frames from a source until
//! that source's stream start has been observed, so a late-registering
//! speaker still sees control before data.
//!
//! All registry state is owned by a single actor task; connection tasks
//! submit serialized [`HubEvent`]s over a channel, so no locking is needed.

pub mod registry;
pub mod server;

pub use registry::Registry;
pub use server::HubServer;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{ControlMessage, PeerRole};

/// Message queued for delivery to one peer connection
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
}

/// Per-connection outbound channel handle held by the registry
pub type PeerSender = mpsc::UnboundedSender<Outbound>;

/// Serialized connection event handled by the registry actor
#[derive(Debug)]
pub enum HubEvent {
    /// New connection, registered under a temporary identity
    Connect { conn_id: String, tx: PeerSender },

    /// Peer announces its routing identity; `reply` carries whether the
    /// announce was accepted (identity collisions are rejected)
    Announce {
        conn_id: String,
        id: String,
        role: PeerRole,
        client_id: String,
        reply: oneshot::Sender<bool>,
    },

    /// Parsed control message from a peer
    Control { from: String, message: ControlMessage },

    /// Binary frame message from a peer
    Binary { from: String, data: Bytes },

    /// Connection closed
    Disconnect { from: String },
}
