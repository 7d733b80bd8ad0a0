//! Room channel naming and the relay wire protocol.
//!
//! Room topics:
//! ```text
//! <namespace>/<room_id>/update          yrs v1 update
//! <namespace>/<room_id>/sync-request    empty
//! <namespace>/<room_id>/sync-response   yrs v1 full state
//! <namespace>/<room_id>/heartbeat       raw peer id
//! <namespace>/<room_id>/leave           raw peer id
//! ```
//!
//! Relay frame (bincode-encoded, one per binary WebSocket message):
//! ```text
//! ┌────────────┬───────────┬──────────┐
//! │ frame_type │ topic     │ payload  │
//! │ 1 byte     │ variable  │ variable │
//! └────────────┴───────────┴──────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Default topic namespace.
pub const DEFAULT_NAMESPACE: &str = "estima";

/// Logical per-room channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Incremental CRDT update
    Update,
    /// Ask any present peer for full state
    SyncRequest,
    /// Full state, broadcast to all
    SyncResponse,
    /// Liveness signal
    Heartbeat,
    /// Explicit departure
    Leave,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Update,
        Channel::SyncRequest,
        Channel::SyncResponse,
        Channel::Heartbeat,
        Channel::Leave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Update => "update",
            Channel::SyncRequest => "sync-request",
            Channel::SyncResponse => "sync-response",
            Channel::Heartbeat => "heartbeat",
            Channel::Leave => "leave",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// Topic names for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTopics {
    prefix: String,
}

impl RoomTopics {
    pub fn new(namespace: &str, room_id: &str) -> Self {
        Self {
            prefix: format!("{namespace}/{room_id}/"),
        }
    }

    /// Full topic name for a channel.
    pub fn topic(&self, channel: Channel) -> String {
        format!("{}{}", self.prefix, channel.as_str())
    }

    /// Channel for a topic, if it belongs to this room.
    pub fn channel_of(&self, topic: &str) -> Option<Channel> {
        topic.strip_prefix(&self.prefix).and_then(Channel::parse)
    }

    /// All five topics of the room.
    pub fn all(&self) -> Vec<String> {
        Channel::ALL.iter().map(|c| self.topic(*c)).collect()
    }
}

/// Relay frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Start receiving publishes on a topic
    Subscribe = 1,
    /// Stop receiving publishes on a topic
    Unsubscribe = 2,
    /// Publish to every subscriber of a topic (relay → client as well)
    Publish = 3,
    /// Keepalive ping
    Ping = 4,
    /// Keepalive pong
    Pong = 5,
}

/// A relay protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub frame_type: FrameType,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl RelayFrame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Subscribe,
            topic: topic.into(),
            payload: Vec::new(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Unsubscribe,
            topic: topic.into(),
            payload: Vec::new(),
        }
    }

    pub fn publish(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            frame_type: FrameType::Publish,
            topic: topic.into(),
            payload,
        }
    }

    pub fn ping() -> Self {
        Self {
            frame_type: FrameType::Ping,
            topic: String::new(),
            payload: Vec::new(),
        }
    }

    pub fn pong() -> Self {
        Self {
            frame_type: FrameType::Pong,
            topic: String::new(),
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
