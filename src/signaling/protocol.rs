#![forbid(unsafe_code)]

// Signaling protocol - Message types for WebSocket communication

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Client-to-Server messages
///
/// Negotiation payloads (`sdp`, `candidate`) are opaque to the relay; they are
/// only checked for presence; the original frame text is what gets forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Open a new room with the sender as broadcaster
    CreateRoom,
    /// Join an existing room as a viewer. The field must be present; a
    /// non-string code decodes to `None` and matches no room.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        #[serde(deserialize_with = "string_or_none")]
        room_id: Option<String>,
    },
    /// Session description from the broadcaster to one viewer
    Offer {
        to: String,
        sdp: Value,
    },
    /// Session description answer; `to` is required when the broadcaster sends it
    Answer {
        #[serde(default)]
        to: Option<String>,
        sdp: Value,
    },
    /// ICE candidate; `to` is required when the broadcaster sends it
    Candidate {
        #[serde(default)]
        to: Option<String>,
        candidate: Value,
    },
}

impl ClientMessage {
    /// Wire name of the message type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom => "create-room",
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::Candidate { .. } => "candidate",
        }
    }
}

/// Server-to-Client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Room created; the sender is its broadcaster
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_code: String,
    },
    /// Joined a room as a viewer
    #[serde(rename_all = "camelCase")]
    JoinedRoom {
        room_id: String,
        viewer_id: String,
    },
    /// Error response
    Error {
        message: String,
    },
    /// A viewer joined the broadcaster's room
    ViewerConnect {
        id: String,
    },
    /// A viewer left the broadcaster's room
    ViewerDisconnect {
        id: String,
    },
    /// The broadcaster is gone and the room no longer exists
    RoomClosed,
}

fn string_or_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(code) => Some(code),
        _ => None,
    })
}

/// Decodes one text frame.
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
