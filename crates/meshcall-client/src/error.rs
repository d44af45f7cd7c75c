use meshcall_media::CaptureError;
use meshcall_protocol::PeerId;
use thiserror::Error;

use crate::network::SignalingError;

/// Step of the offer/answer exchange that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStage {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddCandidate,
    Rollback,
    UpdateTracks,
}

impl std::fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationStage::CreateOffer => "create offer",
            NegotiationStage::CreateAnswer => "create answer",
            NegotiationStage::SetLocalDescription => "set local description",
            NegotiationStage::SetRemoteDescription => "set remote description",
            NegotiationStage::AddCandidate => "add ICE candidate",
            NegotiationStage::Rollback => "rollback",
            NegotiationStage::UpdateTracks => "update tracks",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Media permission denied: {0}")]
    PermissionDenied(String),

    #[error("Capture failed: {0}")]
    Capture(CaptureError),

    #[error("Negotiation with {peer_id} failed to {stage}: {source}")]
    Negotiation {
        peer_id: PeerId,
        stage: NegotiationStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(#[from] SignalingError),

    #[error("No session for peer {0}")]
    UnknownPeer(PeerId),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CallError {
    pub fn negotiation(peer_id: &PeerId, stage: NegotiationStage, source: anyhow::Error) -> Self {
        CallError::Negotiation {
            peer_id: peer_id.clone(),
            stage,
            source,
        }
    }
}

impl From<CaptureError> for CallError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => CallError::PermissionDenied(msg),
            other => CallError::Capture(other),
        }
    }
}

impl From<config::ConfigError> for CallError {
    fn from(err: config::ConfigError) -> Self {
        CallError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
