//! Offer/answer and candidate exchange, one state machine per peer session
//!
//! Every transport operation is bounded by the configured timeout. After
//! each await the session is looked up again by peer id and epoch, so a
//! result that completes for a session that has since been replaced is
//! dropped instead of being applied to the new one.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use meshcall_protocol::{IceCandidate, PeerId, SdpKind, SessionDescription, Signal, SignalEnvelope};
use serde::Deserialize;

use super::registry::SessionRegistry;
use super::session::NegotiationState;
use crate::error::{CallError, NegotiationStage, Result};
use crate::network::SignalingChannel;

/// What to do when a remote offer arrives while our own offer is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlarePolicy {
    /// Roll back our pending offer and answer theirs
    #[default]
    LastWriterWins,
    /// The lower peer id keeps its offer, the higher one rolls back and answers
    LowerIdWins,
}

pub struct NegotiationEngine {
    signaling: Arc<dyn SignalingChannel>,
    glare_policy: GlarePolicy,
    op_timeout: Duration,
}

impl NegotiationEngine {
    pub fn new(signaling: Arc<dyn SignalingChannel>, glare_policy: GlarePolicy, op_timeout: Duration) -> Self {
        Self {
            signaling,
            glare_policy,
            op_timeout,
        }
    }

    pub fn glare_policy(&self) -> GlarePolicy {
        self.glare_policy
    }

    /// Run one transport operation under the operation timeout
    pub(crate) async fn bounded<T, F>(&self, peer_id: &PeerId, stage: NegotiationStage, op: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CallError::negotiation(peer_id, stage, e)),
            Err(_) => Err(CallError::negotiation(
                peer_id,
                stage,
                anyhow!("timed out after {:?}", self.op_timeout),
            )),
        }
    }

    /// Create an offer for `peer_id`, apply it locally and send it
    pub async fn initiate_offer(&self, registry: &mut SessionRegistry, peer_id: &PeerId) -> Result<()> {
        let (epoch, connection) = match registry.get(peer_id) {
            Some(session) => (session.epoch(), session.connection()),
            None => return Err(CallError::UnknownPeer(peer_id.clone())),
        };

        let offer = self
            .bounded(peer_id, NegotiationStage::CreateOffer, connection.create_offer())
            .await
            .inspect_err(|_| note_failure(registry, peer_id, epoch))?;

        if registry.current_mut(peer_id, epoch).is_none() {
            tracing::debug!("Session for {} went away while creating offer", peer_id);
            return Ok(());
        }

        self.bounded(
            peer_id,
            NegotiationStage::SetLocalDescription,
            connection.set_local_description(offer.clone()),
        )
        .await
        .inspect_err(|_| note_failure(registry, peer_id, epoch))?;

        let Some(session) = registry.current_mut(peer_id, epoch) else {
            tracing::debug!("Session for {} went away while applying offer", peer_id);
            return Ok(());
        };
        session.negotiation_state = NegotiationState::HaveLocalOffer;

        tracing::debug!("Sending offer to {}", peer_id);
        self.signaling
            .send_signal(peer_id, Signal::Description(offer).into())
            .await?;
        Ok(())
    }

    /// Apply one inbound signal to the session it belongs to
    pub async fn handle_remote_signal(&self, registry: &mut SessionRegistry, envelope: SignalEnvelope) -> Result<()> {
        let SignalEnvelope { peer_id, signal } = envelope;
        if !registry.contains(&peer_id) {
            return Err(CallError::UnknownPeer(peer_id));
        }

        match signal {
            Signal::Description(description) => self.handle_description(registry, &peer_id, description).await,
            Signal::Candidate(candidate) => self.handle_candidate(registry, &peer_id, candidate).await,
        }
    }

    async fn handle_description(
        &self,
        registry: &mut SessionRegistry,
        peer_id: &PeerId,
        description: SessionDescription,
    ) -> Result<()> {
        match description.kind {
            SdpKind::Offer => self.handle_offer(registry, peer_id, description).await,
            SdpKind::Answer | SdpKind::Pranswer => self.handle_answer(registry, peer_id, description).await,
            SdpKind::Rollback => {
                tracing::warn!("Ignoring rollback description from {}", peer_id);
                Ok(())
            }
        }
    }

    async fn handle_offer(
        &self,
        registry: &mut SessionRegistry,
        peer_id: &PeerId,
        offer: SessionDescription,
    ) -> Result<()> {
        let Some(session) = registry.get(peer_id) else {
            return Err(CallError::UnknownPeer(peer_id.clone()));
        };
        let epoch = session.epoch();
        let connection = session.connection();

        if session.negotiation_state() == NegotiationState::HaveLocalOffer {
            if self.glare_policy == GlarePolicy::LowerIdWins && registry.local_peer_id() < peer_id {
                tracing::info!("Offer collision with {}: keeping our offer", peer_id);
                return Ok(());
            }

            tracing::info!("Offer collision with {}: rolling back our offer", peer_id);
            self.bounded(peer_id, NegotiationStage::Rollback, connection.rollback())
                .await
                .inspect_err(|_| note_failure(registry, peer_id, epoch))?;
            match registry.current_mut(peer_id, epoch) {
                Some(session) => session.negotiation_state = NegotiationState::Stable,
                None => return Ok(()),
            }
        }

        self.bounded(
            peer_id,
            NegotiationStage::SetRemoteDescription,
            connection.set_remote_description(offer),
        )
        .await
        .inspect_err(|_| note_failure(registry, peer_id, epoch))?;

        let Some(session) = registry.current_mut(peer_id, epoch) else {
            return Ok(());
        };
        session.negotiation_state = NegotiationState::HaveRemoteOffer;
        session.has_remote_description = true;

        self.flush_candidates(registry, peer_id, epoch).await;

        let answer = self
            .bounded(peer_id, NegotiationStage::CreateAnswer, connection.create_answer())
            .await
            .inspect_err(|_| note_failure(registry, peer_id, epoch))?;

        self.bounded(
            peer_id,
            NegotiationStage::SetLocalDescription,
            connection.set_local_description(answer.clone()),
        )
        .await
        .inspect_err(|_| note_failure(registry, peer_id, epoch))?;

        let Some(session) = registry.current_mut(peer_id, epoch) else {
            return Ok(());
        };
        session.negotiation_state = NegotiationState::Stable;

        tracing::debug!("Sending answer to {}", peer_id);
        self.signaling
            .send_signal(peer_id, Signal::Description(answer).into())
            .await?;
        Ok(())
    }

    async fn handle_answer(
        &self,
        registry: &mut SessionRegistry,
        peer_id: &PeerId,
        answer: SessionDescription,
    ) -> Result<()> {
        let Some(session) = registry.get(peer_id) else {
            return Err(CallError::UnknownPeer(peer_id.clone()));
        };

        // Duplicate or stray answers are dropped
        if session.negotiation_state() != NegotiationState::HaveLocalOffer {
            tracing::debug!(
                "Ignoring answer from {} in state {:?}",
                peer_id,
                session.negotiation_state()
            );
            return Ok(());
        }

        let epoch = session.epoch();
        let connection = session.connection();
        let provisional = answer.kind == SdpKind::Pranswer;

        self.bounded(
            peer_id,
            NegotiationStage::SetRemoteDescription,
            connection.set_remote_description(answer),
        )
        .await
        .inspect_err(|_| note_failure(registry, peer_id, epoch))?;

        let Some(session) = registry.current_mut(peer_id, epoch) else {
            return Ok(());
        };
        if !provisional {
            session.negotiation_state = NegotiationState::Stable;
        }
        session.has_remote_description = true;
        tracing::debug!("Applied answer from {}", peer_id);

        self.flush_candidates(registry, peer_id, epoch).await;
        Ok(())
    }

    async fn handle_candidate(
        &self,
        registry: &mut SessionRegistry,
        peer_id: &PeerId,
        candidate: IceCandidate,
    ) -> Result<()> {
        let Some(session) = registry.get_mut(peer_id) else {
            return Err(CallError::UnknownPeer(peer_id.clone()));
        };

        if !session.has_remote_description {
            session.pending_candidates.push_back(candidate);
            tracing::debug!(
                "Buffered candidate from {} ({} pending)",
                peer_id,
                session.pending_candidates.len()
            );
            return Ok(());
        }

        let epoch = session.epoch();
        let connection = session.connection();
        self.bounded(
            peer_id,
            NegotiationStage::AddCandidate,
            connection.add_ice_candidate(candidate),
        )
        .await
        .inspect_err(|_| note_failure(registry, peer_id, epoch))
    }

    /// Apply buffered candidates in arrival order. A bad candidate is
    /// logged and skipped.
    async fn flush_candidates(&self, registry: &mut SessionRegistry, peer_id: &PeerId, epoch: u64) {
        let Some(session) = registry.current_mut(peer_id, epoch) else {
            return;
        };
        if session.pending_candidates.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut session.pending_candidates);
        let connection = session.connection();
        tracing::debug!("Flushing {} buffered candidates for {}", pending.len(), peer_id);

        for candidate in pending {
            if let Err(e) = self
                .bounded(peer_id, NegotiationStage::AddCandidate, connection.add_ice_candidate(candidate))
                .await
            {
                tracing::warn!("{}", e);
                note_failure(registry, peer_id, epoch);
            }
        }
    }

    /// Forward a locally gathered candidate to its peer
    pub async fn send_local_candidate(
        &self,
        registry: &SessionRegistry,
        peer_id: &PeerId,
        candidate: IceCandidate,
    ) -> Result<()> {
        if !registry.contains(peer_id) {
            tracing::debug!("Dropping local candidate for departed peer {}", peer_id);
            return Ok(());
        }
        self.signaling
            .send_signal(peer_id, Signal::Candidate(candidate).into())
            .await?;
        Ok(())
    }
}

fn note_failure(registry: &mut SessionRegistry, peer_id: &PeerId, epoch: u64) {
    if let Some(session) = registry.current_mut(peer_id, epoch) {
        session.failures += 1;
    }
}
