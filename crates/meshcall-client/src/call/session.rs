use std::collections::VecDeque;
use std::sync::Arc;

use meshcall_protocol::{IceCandidate, PeerId};

use super::transport::TransportSession;

/// Offer/answer position of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Transport session state for one remote participant
pub struct PeerSession {
    peer_id: PeerId,
    /// Distinguishes this session from an earlier one for the same peer id
    epoch: u64,
    connection: Arc<dyn TransportSession>,
    pub(crate) negotiation_state: NegotiationState,
    /// Candidates received before any remote description, in arrival order
    pub(crate) pending_candidates: VecDeque<IceCandidate>,
    pub(crate) has_remote_description: bool,
    pub(crate) failures: u32,
}

impl PeerSession {
    pub(crate) fn new(peer_id: PeerId, epoch: u64, connection: Arc<dyn TransportSession>) -> Self {
        Self {
            peer_id,
            epoch,
            connection,
            negotiation_state: NegotiationState::Stable,
            pending_candidates: VecDeque::new(),
            has_remote_description: false,
            failures: 0,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn connection(&self) -> Arc<dyn TransportSession> {
        self.connection.clone()
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiation_state
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    /// Negotiation failures seen on this session so far
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("epoch", &self.epoch)
            .field("negotiation_state", &self.negotiation_state)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("has_remote_description", &self.has_remote_description)
            .finish()
    }
}
