//! Protocol definitions for the hub wire format
//!
//! ## Binary frame format
//!
//! One wire message carries one or more coalesced frame records:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              Frame Record (6 byte header)            │
//! ├────────────┬────────────┬────────────────────────────┤
//! │   Seq(4)   │   Len(2)   │      Opus Payload          │
//! │   u32 BE   │   u16 BE   │      Len bytes             │
//! └────────────┴────────────┴────────────────────────────┘
//! ```
//!
//! Records repeat until the message is exhausted. A trailing remainder that
//! does not form a complete record (fewer than 6 bytes left, a zero length,
//! or a length running past the end of the message) is treated as a single
//! unframed legacy payload.
//!
//! Control frames are JSON text messages discriminated by a `type` field;
//! see [`ControlMessage`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Frame record header size in bytes (4-byte sequence + 2-byte length)
pub const RECORD_HEADER_SIZE: usize = 6;

/// Peer role announced to the hub
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Listener,
    Speaker,
    /// Connected but not yet announced
    Unknown,
}

impl PeerRole {
    /// Whether audio control messages should be forwarded to this role.
    ///
    /// Peers that have not announced yet still receive them; their role may
    /// resolve to speaker after the stream has already started.
    pub fn wants_audio_control(&self) -> bool {
        matches!(self, PeerRole::Speaker | PeerRole::Unknown)
    }
}

/// Control message exchanged over the text channel
///
/// A closed union over the message kinds the relay understands; anything
/// that does not parse into one of these variants is rejected by the
/// receiver rather than silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Peer self-assigns its routing identity after connecting
    Announce {
        id: String,
        role: PeerRole,
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Hub notifies other peers of a newly announced peer
    Peer {
        id: String,
        role: PeerRole,
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Hub notifies other peers of a disconnect
    PeerLeft { id: String },

    /// Opaque application control payload, relayed to all peers but the sender
    Control {
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
    },

    /// Listener opens a stream for one upstream user
    AudioStart {
        #[serde(rename = "userId")]
        user_id: String,
        source: String,
    },

    /// Speaker acknowledges a stream start back to the announcing source
    AudioAck {
        #[serde(rename = "userId")]
        user_id: String,
        source: String,
        speaker: String,
    },

    /// Listener closes a stream
    AudioEnd {
        #[serde(rename = "userId")]
        user_id: String,
        source: String,
    },

    /// Hub reports a rejected request (e.g. an identity collision)
    Error { message: String },
}

impl ControlMessage {
    /// Serialize to the JSON text representation sent on the wire
    pub fn to_json(&self) -> String {
        // The closed union above always serializes
        serde_json::to_string(self).expect("control message serialization")
    }

    /// Parse a text frame into a control message
    pub fn from_json(text: &str) -> Result<Self, crate::error::RelayError> {
        serde_json::from_str(text)
            .map_err(|e| crate::error::RelayError::InvalidMessage(e.to_string()))
    }
}

/// One sequenced frame as carried inside a binary wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Sequence number, dense and strictly increasing per source
    pub sequence: u32,

    /// Opaque Opus payload
    pub payload: Bytes,
}

/// One unit recovered from a binary wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// A complete `[seq][len][payload]` record
    Sequenced(FrameRecord),

    /// Trailing bytes without a valid record header (legacy single-frame
    /// message); bypasses sequence-based dedupe
    Legacy(Bytes),
}

/// Encode a batch of frame records into one binary wire message
pub fn encode_records(records: &[FrameRecord]) -> Bytes {
    let total: usize = records
        .iter()
        .map(|r| RECORD_HEADER_SIZE + r.payload.len())
        .sum();
    let mut buf = BytesMut::with_capacity(total);

    for record in records {
        buf.put_u32(record.sequence);
        buf.put_u16(record.payload.len() as u16);
        buf.put_slice(&record.payload);
    }

    buf.freeze()
}

/// Split a binary wire message back into frames
///
/// Parses records left to right; the relative order of frames as sent is
/// preserved. Stops at the first remainder that cannot form a complete
/// record and returns it as a single [`WireFrame::Legacy`] payload.
pub fn split_message(mut data: Bytes) -> Vec<WireFrame> {
    let mut frames = Vec::new();

    while !data.is_empty() {
        if data.len() >= RECORD_HEADER_SIZE {
            let sequence = (&data[..4]).get_u32();
            let len = (&data[4..6]).get_u16() as usize;
            if len > 0 && RECORD_HEADER_SIZE + len <= data.len() {
                data.advance(RECORD_HEADER_SIZE);
                let payload = data.split_to(len);
                frames.push(WireFrame::Sequenced(FrameRecord { sequence, payload }));
                continue;
            }
        }
        // No valid header: the remainder is one unframed frame
        frames.push(WireFrame::Legacy(data));
        break;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u32, payload: &'static [u8]) -> FrameRecord {
        FrameRecord {
            sequence: seq,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_record_round_trip() {
        let records = vec![
            record(1, b"alpha"),
            record(2, b"bravo-longer-frame"),
            record(3, b"c"),
        ];

        let wire = encode_records(&records);
        let frames = split_message(wire);

        assert_eq!(frames.len(), 3);
        for (frame, original) in frames.iter().zip(&records) {
            assert_eq!(frame, &WireFrame::Sequenced(original.clone()));
        }
    }

    #[test]
    fn test_split_preserves_order() {
        let records: Vec<FrameRecord> = (1..=6)
            .map(|seq| FrameRecord {
                sequence: seq,
                payload: Bytes::from(vec![seq as u8; 10]),
            })
            .collect();

        let frames = split_message(encode_records(&records));
        let sequences: Vec<u32> = frames
            .iter()
            .map(|f| match f {
                WireFrame::Sequenced(r) => r.sequence,
                WireFrame::Legacy(_) => panic!("unexpected legacy frame"),
            })
            .collect();

        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_headerless_message_is_legacy() {
        let frames = split_message(Bytes::from_static(b"opus"));
        assert_eq!(frames, vec![WireFrame::Legacy(Bytes::from_static(b"opus"))]);
    }

    #[test]
    fn test_truncated_trailing_record_is_legacy() {
        let mut wire = BytesMut::new();
        wire.put_slice(&encode_records(&[record(7, b"full")]));
        // Header claims 100 payload bytes but only 3 follow
        wire.put_u32(8);
        wire.put_u16(100);
        wire.put_slice(b"cut");

        let frames = split_message(wire.freeze());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], WireFrame::Sequenced(record(7, b"full")));
        assert!(matches!(frames[1], WireFrame::Legacy(_)));
    }

    #[test]
    fn test_zero_length_record_is_legacy() {
        let mut wire = BytesMut::new();
        wire.put_u32(1);
        wire.put_u16(0);
        wire.put_slice(b"rest");

        let frames = split_message(wire.freeze());
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], WireFrame::Legacy(_)));
    }

    #[test]
    fn test_control_message_wire_names() {
        let msg = ControlMessage::AudioStart {
            user_id: "u1".into(),
            source: "L1".into(),
        };
        let json = msg.to_json();
        assert!(json.contains(r#""type":"audio-start""#));
        assert!(json.contains(r#""userId":"u1""#));

        let ack = ControlMessage::from_json(
            r#"{"type":"audio-ack","userId":"u1","source":"L1","speaker":"S1"}"#,
        )
        .unwrap();
        match ack {
            ControlMessage::AudioAck {
                user_id,
                source,
                speaker,
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(source, "L1");
                assert_eq!(speaker, "S1");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_announce_round_trip() {
        let json = r#"{"type":"announce","id":"agentK-1","role":"listener","clientId":"778"}"#;
        let msg = ControlMessage::from_json(json).unwrap();
        match &msg {
            ControlMessage::Announce { id, role, client_id } => {
                assert_eq!(id, "agentK-1");
                assert_eq!(*role, PeerRole::Listener);
                assert_eq!(client_id, "778");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(msg.to_json().contains(r#""clientId":"778""#));
    }

    #[test]
    fn test_malformed_control_rejected() {
        assert!(ControlMessage::from_json(r#"{"type":"warp-drive"}"#).is_err());
        assert!(ControlMessage::from_json("not json").is_err());
    }
}
