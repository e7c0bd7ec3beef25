//! Wire protocol between a client transport and its room relay.
//!
//! Serde-tagged JSON text frames over the room connection. The framing
//! is an implementation detail shared by the two in-tree endpoints, not
//! a compatibility surface.

use crate::doc::Op;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Messages a client sends to its room relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A batch of locally stamped operations, in issue order.
    Ops { ops: Vec<Op> },
}

/// Messages a room relay sends to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full-state handshake, sent once right after the connection is
    /// accepted. The client merges it before reporting itself synced.
    Snapshot { snapshot: Snapshot },
    /// Operations rebroadcast from other peers.
    Ops { ops: Vec<Op> },
    /// Lightweight presence update: current peer count for the room.
    Presence { peers: usize },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(ProtoError::Encode)
    }

    pub fn decode(data: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(data).map_err(ProtoError::Decode)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(ProtoError::Encode)
    }

    pub fn decode(data: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(data).map_err(ProtoError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstrumentId;
    use crate::doc::Mutation;
    use crate::stamp::Stamp;

    #[test]
    fn ops_message_round_trips() {
        let msg = ClientMessage::Ops {
            ops: vec![Op {
                mutation: Mutation::SetCell {
                    instrument: InstrumentId::Drums,
                    row: 0,
                    col: 3,
                    value: true,
                },
                stamp: Stamp::new(7, 70_000),
            }],
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(ClientMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn mutation_wire_shape_is_tagged_snake_case() {
        let op = Op {
            mutation: Mutation::SetBpm { value: 90 },
            stamp: Stamp::new(3, 70_000),
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "set_bpm");
        assert_eq!(value["value"], 90);
        assert_eq!(value["stamp"]["counter"], 3);
    }

    #[test]
    fn unknown_message_types_fail_to_decode() {
        assert!(ServerMessage::decode("{\"type\":\"nonsense\"}").is_err());
    }
}
