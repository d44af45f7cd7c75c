use serde::{Deserialize, Serialize};

use crate::types::{PeerId, SignalPayload};

/// Messages sent from client to the signaling relay via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join the call room keyed by an opaque identifier (the meeting URL)
    JoinCall { room: String },

    /// Negotiation payload addressed to one peer
    Signal { target: PeerId, payload: SignalPayload },

    /// Chat line for every member of the room
    ChatMessage { text: String, sender_name: String },

    /// Leave the current room
    Leave,

    /// Ping to keep connection alive
    Ping,
}

/// Messages sent from the signaling relay to the client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection, carries the local peer id
    Welcome { peer_id: PeerId },

    /// A peer joined; `members` is the full current room membership,
    /// including the joined peer
    UserJoined { peer_id: PeerId, members: Vec<PeerId> },

    /// A peer left the room
    UserLeft { peer_id: PeerId },

    /// Negotiation payload from another peer
    Signal { from: PeerId, payload: SignalPayload },

    /// Chat line from a room member (possibly ourselves)
    ChatMessage {
        text: String,
        sender_name: String,
        sender_peer_id: PeerId,
    },

    /// Pong response to ping
    Pong,

    /// Error message
    Error { message: String },
}
