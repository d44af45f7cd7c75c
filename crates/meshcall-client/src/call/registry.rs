//! Peer session registry
//!
//! Owns one [`PeerSession`] per joined remote peer. Sessions are only
//! created and destroyed through the lifecycle functions here.

use std::collections::BTreeMap;
use std::sync::Arc;

use meshcall_media::MediaStream;
use meshcall_protocol::PeerId;

use super::session::PeerSession;
use super::transport::{SessionKey, TransportEventSender, TransportFactory, TransportSession};

/// Result of processing a peer-joined notification
#[derive(Debug, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Sessions created for this notification
    pub created: Vec<PeerId>,
    /// The joined peer is us: we must offer to everyone already present
    pub local_joined: bool,
}

pub struct SessionRegistry {
    local_peer_id: PeerId,
    factory: Arc<dyn TransportFactory>,
    events: TransportEventSender,
    sessions: BTreeMap<PeerId, PeerSession>,
    next_epoch: u64,
}

impl SessionRegistry {
    pub fn new(local_peer_id: PeerId, factory: Arc<dyn TransportFactory>, events: TransportEventSender) -> Self {
        Self {
            local_peer_id,
            factory,
            events,
            sessions: BTreeMap::new(),
            next_epoch: 0,
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Create sessions for every member not yet known, seeded with the
    /// tracks of `local_stream`.
    pub async fn on_joined(&mut self, peer_id: &PeerId, members: &[PeerId], local_stream: &MediaStream) -> JoinOutcome {
        let mut outcome = JoinOutcome {
            created: Vec::new(),
            local_joined: *peer_id == self.local_peer_id,
        };

        for member in members.iter().chain(std::iter::once(peer_id)) {
            if *member == self.local_peer_id || self.sessions.contains_key(member) {
                continue;
            }

            match self.create(member, local_stream).await {
                Ok(()) => outcome.created.push(member.clone()),
                Err(e) => tracing::error!("Failed to create session for {}: {}", member, e),
            }
        }

        outcome
    }

    async fn create(&mut self, peer_id: &PeerId, local_stream: &MediaStream) -> anyhow::Result<()> {
        let key = SessionKey {
            peer_id: peer_id.clone(),
            epoch: self.next_epoch,
        };
        self.next_epoch += 1;
        let connection = self.factory.create_session(&key, self.events.clone()).await?;

        for track in local_stream.tracks() {
            if let Err(e) = connection.add_track(track).await {
                tracing::warn!("Failed to attach local {} track to {}: {}", track.kind(), peer_id, e);
            }
        }

        self.sessions
            .insert(peer_id.clone(), PeerSession::new(peer_id.clone(), key.epoch, connection));

        tracing::info!(
            "Session created for {} with {} local tracks ({} sessions)",
            peer_id,
            local_stream.tracks().len(),
            self.sessions.len()
        );
        Ok(())
    }

    /// Close and forget the session for `peer_id`. Idempotent.
    pub async fn on_left(&mut self, peer_id: &PeerId) -> bool {
        self.destroy(peer_id, "peer left").await
    }

    pub async fn destroy(&mut self, peer_id: &PeerId, reason: &str) -> bool {
        let Some(session) = self.sessions.remove(peer_id) else {
            tracing::debug!("No session for {} to remove ({})", peer_id, reason);
            return false;
        };

        if let Err(e) = session.connection().close().await {
            tracing::warn!("Error closing connection to {}: {}", peer_id, e);
        }

        tracing::info!("Session for {} removed: {}", peer_id, reason);
        true
    }

    /// Close every session; used when the call ends
    pub async fn terminate_all(&mut self) {
        let sessions = std::mem::take(&mut self.sessions);
        for (peer_id, session) in sessions {
            if let Err(e) = session.connection().close().await {
                tracing::warn!("Error closing connection to {}: {}", peer_id, e);
            }
        }
        tracing::info!("All sessions terminated");
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    pub(crate) fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerSession> {
        self.sessions.get_mut(peer_id)
    }

    /// The session for `peer_id`, only if it is still the one with `epoch`
    pub(crate) fn current_mut(&mut self, peer_id: &PeerId, epoch: u64) -> Option<&mut PeerSession> {
        self.sessions.get_mut(peer_id).filter(|s| s.epoch() == epoch)
    }

    /// Whether `key` names the live session for its peer
    pub fn is_current(&self, key: &SessionKey) -> bool {
        self.sessions
            .get(&key.peer_id)
            .is_some_and(|s| s.epoch() == key.epoch)
    }

    pub fn connection(&self, peer_id: &PeerId) -> Option<Arc<dyn TransportSession>> {
        self.sessions.get(peer_id).map(|s| s.connection())
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.sessions.contains_key(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::testing::FakeTransportFactory;
    use meshcall_media::synthetic;
    use tokio::sync::mpsc;

    fn registry(local: &str) -> (SessionRegistry, Arc<FakeTransportFactory>) {
        let factory = Arc::new(FakeTransportFactory::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        (SessionRegistry::new(PeerId::from(local), factory.clone(), tx), factory)
    }

    fn ids(ids: &[&str]) -> Vec<PeerId> {
        ids.iter().map(|id| PeerId::from(*id)).collect()
    }

    #[tokio::test]
    async fn join_creates_one_session_per_remote_member() {
        let (mut registry, factory) = registry("b");
        let stream = synthetic::fallback_stream();

        let outcome = registry.on_joined(&PeerId::from("b"), &ids(&["a", "b", "c"]), &stream).await;

        assert!(outcome.local_joined);
        assert_eq!(outcome.created, ids(&["a", "c"]));
        assert_eq!(registry.peer_ids(), ids(&["a", "c"]));
        assert_eq!(factory.session(&PeerId::from("a")).outbound_kinds().len(), 2);
    }

    #[tokio::test]
    async fn repeated_join_keeps_existing_sessions() {
        let (mut registry, factory) = registry("a");
        let stream = synthetic::fallback_stream();

        registry.on_joined(&PeerId::from("b"), &ids(&["a", "b"]), &stream).await;
        let outcome = registry.on_joined(&PeerId::from("c"), &ids(&["a", "b", "c"]), &stream).await;

        assert!(!outcome.local_joined);
        assert_eq!(outcome.created, ids(&["c"]));
        assert_eq!(registry.len(), 2);
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_isolated() {
        let (mut registry, factory) = registry("a");
        let stream = synthetic::fallback_stream();
        registry.on_joined(&PeerId::from("c"), &ids(&["a", "b", "c"]), &stream).await;

        assert!(registry.on_left(&PeerId::from("b")).await);
        assert!(!registry.on_left(&PeerId::from("b")).await);

        assert_eq!(registry.peer_ids(), ids(&["c"]));
        assert!(factory.session(&PeerId::from("b")).is_closed());
        assert!(!factory.session(&PeerId::from("c")).is_closed());
    }

    #[tokio::test]
    async fn terminate_all_closes_everything() {
        let (mut registry, factory) = registry("a");
        let stream = synthetic::fallback_stream();
        registry.on_joined(&PeerId::from("c"), &ids(&["a", "b", "c"]), &stream).await;

        registry.terminate_all().await;

        assert!(registry.is_empty());
        assert!(factory.session(&PeerId::from("b")).is_closed());
        assert!(factory.session(&PeerId::from("c")).is_closed());
    }

    #[tokio::test]
    async fn rejoined_peer_gets_a_new_epoch() {
        let (mut registry, _factory) = registry("a");
        let stream = synthetic::fallback_stream();
        registry.on_joined(&PeerId::from("b"), &ids(&["a", "b"]), &stream).await;
        let first = registry.get(&PeerId::from("b")).unwrap().epoch();

        registry.on_left(&PeerId::from("b")).await;
        registry.on_joined(&PeerId::from("b"), &ids(&["a", "b"]), &stream).await;

        let second = registry.get(&PeerId::from("b")).unwrap().epoch();
        assert_ne!(first, second);
        assert!(registry.current_mut(&PeerId::from("b"), first).is_none());
    }
}
