//! Signaling channel adapter
//!
//! The call core only needs a handful of capabilities from its signaling
//! transport; [`SignalingChannel`] names them. Inbound traffic arrives as a
//! stream of [`SignalingEvent`]s. Delivery is FIFO per peer and unordered
//! across peers.

mod websocket;

use async_trait::async_trait;
use meshcall_protocol::{ChatMessage, PeerId, SignalEnvelope, SignalPayload};
use thiserror::Error;
use tokio::sync::mpsc;

pub use websocket::WebSocketSignaling;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Failed to connect to signaling relay: {0}")]
    Connect(String),

    #[error("Signaling handshake failed: {0}")]
    Handshake(String),

    #[error("Signaling channel closed")]
    Closed,

    #[error("Malformed signaling message: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Inbound signaling traffic
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    /// `peer_id` joined; `members` is the full current room membership
    PeerJoined { peer_id: PeerId, members: Vec<PeerId> },
    PeerLeft { peer_id: PeerId },
    Signal(SignalEnvelope),
    Chat(ChatMessage),
    /// The channel is gone; no further events will arrive
    Disconnected,
}

pub type SignalingEventReceiver = mpsc::UnboundedReceiver<SignalingEvent>;
pub type SignalingEventSender = mpsc::UnboundedSender<SignalingEvent>;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Id the relay assigned to this client
    fn local_peer_id(&self) -> &PeerId;

    async fn join(&self, room: &str) -> Result<(), SignalingError>;

    async fn send_signal(&self, target: &PeerId, payload: SignalPayload) -> Result<(), SignalingError>;

    async fn send_chat(&self, text: &str, sender_name: &str) -> Result<(), SignalingError>;

    async fn leave(&self) -> Result<(), SignalingError>;
}
