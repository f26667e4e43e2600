//! Peer registry and routing rules
//!
//! Owns all per-peer state: records keyed by identity, pre-start frame
//! buffers, and the set of identities with an open stream. Mutated only by
//! the registry actor; see [`crate::hub`].

use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::RelayError;
use crate::hub::{Outbound, PeerSender};
use crate::protocol::{ControlMessage, PeerRole};

/// One connected peer
pub struct PeerRecord {
    pub role: PeerRole,
    pub client_id: Option<String>,
    tx: PeerSender,
}

/// Registry of connected peers and per-source buffers
pub struct Registry {
    peers: HashMap<String, PeerRecord>,
    /// Binary frames received before the sender's stream start, per sender
    pending: HashMap<String, VecDeque<Bytes>>,
    /// Identities with an observed stream start
    streaming: HashSet<String>,
    prestart_cap: usize,
    dropped_prestart: u64,
}

impl Registry {
    pub fn new(prestart_cap: usize) -> Self {
        Self {
            peers: HashMap::new(),
            pending: HashMap::new(),
            streaming: HashSet::new(),
            prestart_cap,
            dropped_prestart: 0,
        }
    }

    /// Register a fresh connection under its temporary identity
    pub fn connect(&mut self, conn_id: String, tx: PeerSender) {
        tracing::info!("[connect] {} peers={}", conn_id, self.peers.len() + 1);
        self.peers.insert(
            conn_id,
            PeerRecord {
                role: PeerRole::Unknown,
                client_id: None,
                tx,
            },
        );
    }

    /// Replace a temporary identity with the announced one
    ///
    /// A colliding identity is rejected and reported back to the announcing
    /// connection; the prior holder is never silently evicted.
    pub fn announce(
        &mut self,
        conn_id: &str,
        id: String,
        role: PeerRole,
        client_id: String,
    ) -> Result<(), RelayError> {
        if id != conn_id && self.peers.contains_key(&id) {
            tracing::warn!("[announce] identity collision rejected: {}", id);
            self.send_to(
                conn_id,
                Outbound::Text(
                    ControlMessage::Error {
                        message: format!("identity already announced: {}", id),
                    }
                    .to_json(),
                ),
            );
            return Err(RelayError::IdentityTaken(id));
        }

        let Some(mut record) = self.peers.remove(conn_id) else {
            return Err(RelayError::UnknownPeer(conn_id.to_string()));
        };
        record.role = role;
        record.client_id = Some(client_id.clone());
        self.peers.insert(id.clone(), record);

        // Frames buffered before the announce follow the new identity
        if let Some(buffered) = self.pending.remove(conn_id) {
            self.pending.insert(id.clone(), buffered);
        }

        tracing::info!(
            "[announce] {} role={:?} client={} peers={}",
            id,
            role,
            client_id,
            self.peers.len()
        );
        tracing::debug!("[registry snapshot] {:?}", self.snapshot());

        self.broadcast_text(
            &id,
            ControlMessage::Peer {
                id: id.clone(),
                role,
                client_id,
            }
            .to_json(),
        );
        Ok(())
    }

    /// Forward an opaque control payload to all peers except the sender
    pub fn control(&self, from: &str, message: &ControlMessage) {
        self.broadcast_text(from, message.to_json());
    }

    /// Route an ack to its target source only
    ///
    /// An unknown target is logged and dropped; the ack is advisory and the
    /// sender already buffers.
    pub fn audio_ack(&self, from: &str, message: &ControlMessage) {
        let ControlMessage::AudioAck { source, .. } = message else {
            return;
        };
        if self.peers.contains_key(source) {
            tracing::debug!("[audio-ack] {} -> {}", from, source);
            self.send_to(source, Outbound::Text(message.to_json()));
        } else {
            tracing::warn!("[audio-ack] unknown target {}, dropping", source);
        }
    }

    /// Handle a stream start: mark the sender open, forward the control
    /// message to speaker and not-yet-announced peers, and return any
    /// pre-start frames for release in arrival order.
    ///
    /// The caller releases the returned frames only after yielding once, so
    /// recipients get a turn to prepare a sink before data arrives.
    pub fn audio_start(&mut self, from: &str, message: &ControlMessage) -> Vec<Bytes> {
        self.streaming.insert(from.to_string());
        self.forward_audio_control(from, message);
        tracing::debug!("[registry snapshot] {:?}", self.snapshot());

        self.pending
            .remove(from)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Handle a stream end: forward and clear per-sender stream state
    pub fn audio_end(&mut self, from: &str, message: &ControlMessage) {
        self.streaming.remove(from);
        self.pending.remove(from);
        self.forward_audio_control(from, message);
    }

    /// Handle a binary frame message from a peer
    pub fn binary(&mut self, from: &str, data: Bytes) {
        if self.streaming.contains(from) {
            self.broadcast_binary(from, data);
        } else {
            let queue = self.pending.entry(from.to_string()).or_default();
            if queue.len() >= self.prestart_cap {
                queue.pop_front();
                self.dropped_prestart += 1;
                tracing::warn!("[buffer overflow] dropping oldest pre-start frame for {}", from);
            }
            queue.push_back(data);
        }
    }

    /// Remove a peer and its buffers, notifying the others
    pub fn disconnect(&mut self, id: &str) {
        if self.peers.remove(id).is_some() {
            self.pending.remove(id);
            self.streaming.remove(id);
            tracing::info!("[left] {} peers={}", id, self.peers.len());
            self.broadcast_text(id, ControlMessage::PeerLeft { id: id.to_string() }.to_json());
        }
    }

    /// Forward one binary frame to every peer except the sender
    pub fn broadcast_binary(&self, from: &str, data: Bytes) {
        for (id, record) in &self.peers {
            if id == from {
                continue;
            }
            if record.tx.send(Outbound::Binary(data.clone())).is_err() {
                tracing::warn!("[binary fwd] send to {} failed", id);
            }
        }
    }

    /// Number of pre-start frames buffered for one sender
    pub fn pending_len(&self, id: &str) -> usize {
        self.pending.get(id).map_or(0, VecDeque::len)
    }

    /// Total pre-start frames dropped to the capacity bound
    pub fn dropped_prestart(&self) -> u64 {
        self.dropped_prestart
    }

    fn forward_audio_control(&self, from: &str, message: &ControlMessage) {
        let json = message.to_json();
        for (id, record) in &self.peers {
            if id == from || !record.role.wants_audio_control() {
                continue;
            }
            if record.tx.send(Outbound::Text(json.clone())).is_err() {
                tracing::warn!("[audio-control fwd] send to {} failed", id);
            }
        }
    }

    fn broadcast_text(&self, except: &str, json: String) {
        for (id, record) in &self.peers {
            if id == except {
                continue;
            }
            if record.tx.send(Outbound::Text(json.clone())).is_err() {
                tracing::warn!("[broadcast] send to {} failed", id);
            }
        }
    }

    fn send_to(&self, id: &str, out: Outbound) {
        if let Some(record) = self.peers.get(id) {
            if record.tx.send(out).is_err() {
                tracing::warn!("[send] send to {} failed", id);
            }
        }
    }

    fn snapshot(&self) -> Vec<(String, PeerRole)> {
        self.peers
            .iter()
            .map(|(id, r)| (id.clone(), r.role))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn start_msg(source: &str) -> ControlMessage {
        ControlMessage::AudioStart {
            user_id: "u1".into(),
            source: source.into(),
        }
    }

    fn join(registry: &mut Registry, id: &str, role: PeerRole) -> UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = format!("conn-{}", id);
        registry.connect(conn.clone(), tx);
        registry
            .announce(&conn, id.to_string(), role, "client".into())
            .unwrap();
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_announce_collision_rejected() {
        let mut registry = Registry::new(10);
        let _first = join(&mut registry, "L1", PeerRole::Listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.connect("conn-2".into(), tx);
        let result = registry.announce("conn-2", "L1".into(), PeerRole::Listener, "c2".into());

        assert!(matches!(result, Err(RelayError::IdentityTaken(_))));
        match rx.try_recv().unwrap() {
            Outbound::Text(json) => assert!(json.contains(r#""type":"error""#)),
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    #[test]
    fn test_ack_routes_to_source_only() {
        let mut registry = Registry::new(10);
        let mut listener_rx = join(&mut registry, "L1", PeerRole::Listener);
        let mut other_rx = join(&mut registry, "L2", PeerRole::Listener);
        drain(&mut listener_rx);
        drain(&mut other_rx);

        let ack = ControlMessage::AudioAck {
            user_id: "u1".into(),
            source: "L1".into(),
            speaker: "S1".into(),
        };
        registry.audio_ack("S1", &ack);

        assert_eq!(drain(&mut listener_rx).len(), 1);
        assert!(drain(&mut other_rx).is_empty());

        // Unknown target: dropped, no panic
        let stray = ControlMessage::AudioAck {
            user_id: "u1".into(),
            source: "nobody".into(),
            speaker: "S1".into(),
        };
        registry.audio_ack("S1", &stray);
    }

    #[test]
    fn test_binary_buffered_until_start_in_order() {
        let mut registry = Registry::new(10);
        let mut listener_rx = join(&mut registry, "L2", PeerRole::Listener);
        let mut speaker_rx = join(&mut registry, "S1", PeerRole::Speaker);
        drain(&mut listener_rx);
        drain(&mut speaker_rx);

        for byte in [1u8, 2, 3] {
            registry.binary("L2", Bytes::from(vec![byte]));
        }
        assert!(drain(&mut speaker_rx).is_empty());
        assert_eq!(registry.pending_len("L2"), 3);

        let buffered = registry.audio_start("L2", &start_msg("L2"));
        for frame in &buffered {
            registry.broadcast_binary("L2", frame.clone());
        }
        registry.binary("L2", Bytes::from(vec![4u8]));

        let received: Vec<u8> = drain(&mut speaker_rx)
            .into_iter()
            .filter_map(|out| match out {
                Outbound::Binary(b) => Some(b[0]),
                Outbound::Text(_) => None,
            })
            .collect();
        assert_eq!(received, vec![1, 2, 3, 4]);
        assert_eq!(registry.pending_len("L2"), 0);
    }

    #[test]
    fn test_prestart_buffer_drops_oldest() {
        let mut registry = Registry::new(3);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.connect("L1".into(), tx);

        for byte in 0u8..5 {
            registry.binary("L1", Bytes::from(vec![byte]));
        }
        assert_eq!(registry.pending_len("L1"), 3);
        assert_eq!(registry.dropped_prestart(), 2);

        let buffered = registry.audio_start("L1", &start_msg("L1"));
        let kept: Vec<u8> = buffered.iter().map(|b| b[0]).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_audio_control_skips_announced_listeners() {
        let mut registry = Registry::new(10);
        let mut listener_rx = join(&mut registry, "L9", PeerRole::Listener);
        let mut speaker_rx = join(&mut registry, "S1", PeerRole::Speaker);
        // Connected but not announced
        let (tx, mut unknown_rx) = mpsc::unbounded_channel();
        registry.connect("conn-x".into(), tx);
        drain(&mut listener_rx);
        drain(&mut speaker_rx);

        registry.audio_start("L1", &start_msg("L1"));

        assert!(drain(&mut listener_rx).is_empty());
        assert_eq!(drain(&mut speaker_rx).len(), 1);
        assert_eq!(drain(&mut unknown_rx).len(), 1);
    }

    #[test]
    fn test_audio_end_clears_stream_state() {
        let mut registry = Registry::new(10);
        let mut speaker_rx = join(&mut registry, "S1", PeerRole::Speaker);
        drain(&mut speaker_rx);

        registry.audio_start("L1", &start_msg("L1"));
        registry.binary("L1", Bytes::from_static(b"live"));
        assert_eq!(drain(&mut speaker_rx).len(), 2);

        registry.audio_end(
            "L1",
            &ControlMessage::AudioEnd {
                user_id: "u1".into(),
                source: "L1".into(),
            },
        );
        // Stream closed: frames buffer again instead of forwarding
        registry.binary("L1", Bytes::from_static(b"late"));
        assert_eq!(drain(&mut speaker_rx).len(), 1); // just the audio-end
        assert_eq!(registry.pending_len("L1"), 1);
    }

    #[test]
    fn test_disconnect_broadcasts_peer_left() {
        let mut registry = Registry::new(10);
        let _gone = join(&mut registry, "L1", PeerRole::Listener);
        let mut stay_rx = join(&mut registry, "S1", PeerRole::Speaker);
        drain(&mut stay_rx);

        registry.disconnect("L1");
        match drain(&mut stay_rx).pop().unwrap() {
            Outbound::Text(json) => {
                assert!(json.contains(r#""type":"peer-left""#));
                assert!(json.contains("L1"));
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
    }
}
