//! Transport session seam
//!
//! A transport session is the point-to-point media link to one peer. The
//! call core drives it through [`TransportSession`]; callbacks from the
//! underlying connection come back as [`TransportEvent`]s on the call's
//! event queue instead of running call logic inside the callback.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use meshcall_media::{MediaTrack, TrackKind};
use meshcall_protocol::{IceCandidate, PeerId, SessionDescription};
use tokio::sync::mpsc;

/// One transport session. A peer that leaves and rejoins gets a new epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub peer_id: PeerId,
    pub epoch: u64,
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.peer_id, self.epoch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Inbound track announced by a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Locally gathered candidate to forward to the peer
    LocalCandidate { session: SessionKey, candidate: IceCandidate },
    RemoteTrack { session: SessionKey, track: RemoteTrackInfo },
    ConnectionState { session: SessionKey, state: ConnectionState },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;

    /// Detach every outbound track; returns how many were detached
    async fn remove_outbound_tracks(&self) -> Result<usize>;

    /// Swap the outbound track of `track.kind()` in place.
    /// Returns `false` when no sender of that kind exists.
    async fn replace_outbound_track(&self, track: &MediaTrack) -> Result<bool>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Discard a pending local offer and return to stable
    async fn rollback(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_session(
        &self,
        key: &SessionKey,
        events: TransportEventSender,
    ) -> Result<Arc<dyn TransportSession>>;
}
