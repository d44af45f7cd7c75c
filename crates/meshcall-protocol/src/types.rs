use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier the relay assigns to each connected participant.
///
/// Stable for the lifetime of one signaling connection; a participant that
/// reconnects gets a new id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }
}

/// Connectivity candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Body of a `signal` message as exchanged with browser clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<IceCandidate>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("signal payload carries neither a description nor a candidate")]
    Empty,
}

impl SignalPayload {
    /// Split the payload into signals, description first.
    pub fn into_signals(self) -> Result<Vec<Signal>, PayloadError> {
        let mut signals = Vec::with_capacity(2);
        if let Some(description) = self.sdp {
            signals.push(Signal::Description(description));
        }
        if let Some(candidate) = self.ice {
            signals.push(Signal::Candidate(candidate));
        }
        if signals.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(signals)
    }
}

/// One unit of negotiation traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

impl From<Signal> for SignalPayload {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Description(sdp) => SignalPayload {
                sdp: Some(sdp),
                ice: None,
            },
            Signal::Candidate(ice) => SignalPayload {
                sdp: None,
                ice: Some(ice),
            },
        }
    }
}

/// A signal together with the remote peer it came from or goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub peer_id: PeerId,
    pub signal: Signal,
}

impl SignalEnvelope {
    pub fn new(peer_id: PeerId, signal: Signal) -> Self {
        Self { peer_id, signal }
    }

    /// Unpack a wire payload into one envelope per carried signal.
    pub fn from_payload(peer_id: PeerId, payload: SignalPayload) -> Result<Vec<Self>, PayloadError> {
        Ok(payload
            .into_signals()?
            .into_iter()
            .map(|signal| Self::new(peer_id.clone(), signal))
            .collect())
    }
}

/// Chat line relayed to every room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub sender_peer_id: PeerId,
}

/// ICE server configuration for WebRTC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}
