//! In-memory stand-ins for the transport, signaling and capture seams

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use meshcall_media::{CaptureError, MediaStream, MediaTrack, TrackKind, TrackSource};
use meshcall_protocol::{IceCandidate, PeerId, SdpKind, SessionDescription, SignalEnvelope, SignalPayload};
use tokio::sync::mpsc;

use super::session::NegotiationState;
use super::{CallController, CallHandle, CallOptions};
use super::transport::{
    ConnectionState, RemoteTrackInfo, SessionKey, TransportEvent, TransportEventSender, TransportFactory,
    TransportSession,
};
use crate::media::{CaptureDevices, DeviceAvailability, MediaConstraints};
use crate::network::{SignalingChannel, SignalingError, SignalingEvent, SignalingEventSender};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct FakeTransportFactory {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeTransportFactory {
    /// Most recent session created for `peer_id`
    pub fn session(&self, peer_id: &PeerId) -> Arc<FakeSession> {
        lock(&self.sessions)
            .iter()
            .rev()
            .find(|s| s.key.peer_id == *peer_id)
            .cloned()
            .unwrap_or_else(|| panic!("no session for {}", peer_id))
    }

    pub fn created_count(&self) -> usize {
        lock(&self.sessions).len()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create_session(&self, key: &SessionKey, events: TransportEventSender) -> Result<Arc<dyn TransportSession>> {
        let session = Arc::new(FakeSession {
            key: key.clone(),
            events,
            state: Mutex::new(FakeState::default()),
        });
        lock(&self.sessions).push(session.clone());
        Ok(session)
    }
}

#[derive(Default)]
struct FakeState {
    outbound: Vec<MediaTrack>,
    signaling: NegotiationState,
    has_remote: bool,
    offers_created: usize,
    answers_created: usize,
    local_descriptions: Vec<SessionDescription>,
    remote_descriptions: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    replacements: usize,
    rollbacks: usize,
    closed: bool,
    fail_offers: bool,
    stall_offers: bool,
}

/// Records every call and enforces the offer/answer state rules of a real
/// peer connection.
pub struct FakeSession {
    key: SessionKey,
    events: TransportEventSender,
    state: Mutex<FakeState>,
}

impl FakeSession {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn outbound_kinds(&self) -> Vec<TrackKind> {
        lock(&self.state).outbound.iter().map(|t| t.kind()).collect()
    }

    pub fn outbound_track_ids(&self) -> Vec<String> {
        lock(&self.state).outbound.iter().map(|t| t.id().to_string()).collect()
    }

    pub fn offers_created(&self) -> usize {
        lock(&self.state).offers_created
    }

    pub fn answers_created(&self) -> usize {
        lock(&self.state).answers_created
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        lock(&self.state).local_descriptions.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        lock(&self.state).remote_descriptions.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        lock(&self.state).candidates.clone()
    }

    pub fn replacements(&self) -> usize {
        lock(&self.state).replacements
    }

    pub fn rollbacks(&self) -> usize {
        lock(&self.state).rollbacks
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn signaling_state(&self) -> NegotiationState {
        lock(&self.state).signaling
    }

    pub fn fail_offers(&self) {
        lock(&self.state).fail_offers = true;
    }

    /// Offers never complete
    pub fn stall_offers(&self) {
        lock(&self.state).stall_offers = true;
    }

    pub fn emit_state(&self, state: ConnectionState) {
        let _ = self.events.send(TransportEvent::ConnectionState {
            session: self.key.clone(),
            state,
        });
    }

    pub fn emit_remote_track(&self, track_id: &str, stream_id: &str, kind: TrackKind) {
        let _ = self.events.send(TransportEvent::RemoteTrack {
            session: self.key.clone(),
            track: RemoteTrackInfo {
                track_id: track_id.to_string(),
                stream_id: stream_id.to_string(),
                kind,
            },
        });
    }

    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(TransportEvent::LocalCandidate {
            session: self.key.clone(),
            candidate,
        });
    }

    /// One `a=track` line per outbound track
    fn describe(&self, state: &FakeState, label: &str, serial: usize) -> String {
        let mut sdp = format!("v=0\r\no=fake {} {} {}\r\n", self.key.peer_id, label, serial);
        for track in &state.outbound {
            sdp.push_str(&format!(
                "a=track:{}:{}:{}\r\n",
                track.kind(),
                track.id(),
                if track.is_enabled() { "enabled" } else { "disabled" }
            ));
        }
        sdp
    }
}

/// Tracks listed in a fake session description, as `(kind, id, enabled)`
pub fn described_tracks(description: &SessionDescription) -> Vec<(String, String, bool)> {
    description
        .sdp
        .lines()
        .filter_map(|line| line.strip_prefix("a=track:"))
        .filter_map(|rest| {
            let mut parts = rest.split(':');
            let kind = parts.next()?.to_string();
            let id = parts.next()?.to_string();
            let enabled = parts.next()? == "enabled";
            Some((kind, id, enabled))
        })
        .collect()
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            bail!("connection closed");
        }
        if state.outbound.contains(track) {
            bail!("track {} already added", track.id());
        }
        state.outbound.push(track.clone());
        Ok(())
    }

    async fn remove_outbound_tracks(&self) -> Result<usize> {
        let mut state = lock(&self.state);
        let removed = state.outbound.len();
        state.outbound.clear();
        Ok(removed)
    }

    async fn replace_outbound_track(&self, track: &MediaTrack) -> Result<bool> {
        let mut state = lock(&self.state);
        match state.outbound.iter().position(|t| t.kind() == track.kind()) {
            Some(index) => {
                state.outbound[index] = track.clone();
                state.replacements += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let stall = {
            let state = lock(&self.state);
            if state.closed {
                bail!("connection closed");
            }
            if state.fail_offers {
                bail!("offer generation failed");
            }
            state.stall_offers
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        state.offers_created += 1;
        let serial = state.offers_created;
        Ok(SessionDescription::offer(self.describe(&state, "offer", serial)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = lock(&self.state);
        if state.signaling != NegotiationState::HaveRemoteOffer {
            bail!("create answer in state {:?}", state.signaling);
        }
        state.answers_created += 1;
        let serial = state.answers_created;
        Ok(SessionDescription::answer(self.describe(&state, "answer", serial)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = lock(&self.state);
        state.signaling = match (description.kind, state.signaling) {
            (SdpKind::Offer, NegotiationState::Stable | NegotiationState::HaveLocalOffer) => {
                NegotiationState::HaveLocalOffer
            }
            (SdpKind::Answer, NegotiationState::HaveRemoteOffer) => NegotiationState::Stable,
            (kind, current) => bail!("local {:?} in state {:?}", kind, current),
        };
        state.local_descriptions.push(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = lock(&self.state);
        state.signaling = match (description.kind, state.signaling) {
            (SdpKind::Offer, NegotiationState::Stable | NegotiationState::HaveRemoteOffer) => {
                NegotiationState::HaveRemoteOffer
            }
            (SdpKind::Answer, NegotiationState::HaveLocalOffer) => NegotiationState::Stable,
            (SdpKind::Pranswer, NegotiationState::HaveLocalOffer) => NegotiationState::HaveLocalOffer,
            (kind, current) => bail!("remote {:?} in state {:?}", kind, current),
        };
        state.has_remote = true;
        state.remote_descriptions.push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.has_remote {
            bail!("candidate before remote description");
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.signaling != NegotiationState::HaveLocalOffer {
            bail!("rollback in state {:?}", state.signaling);
        }
        state.signaling = NegotiationState::Stable;
        state.rollbacks += 1;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        lock(&self.state).closed = true;
        self.emit_state(ConnectionState::Closed);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Join(String),
    Signal(PeerId, SignalPayload),
    Chat { text: String, sender_name: String },
    Leave,
}

/// Signaling channel that records outbound traffic
pub struct FakeSignaling {
    local_peer_id: PeerId,
    sent: Mutex<Vec<Sent>>,
    unavailable: Mutex<bool>,
}

impl FakeSignaling {
    pub fn new(local_peer_id: &str) -> Self {
        Self {
            local_peer_id: PeerId::from(local_peer_id),
            sent: Mutex::new(Vec::new()),
            unavailable: Mutex::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *lock(&self.unavailable) = unavailable;
    }

    pub fn sent(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    /// Drain outbound signals, keeping everything else
    pub fn take_signals(&self) -> Vec<(PeerId, SignalPayload)> {
        let mut sent = lock(&self.sent);
        let mut signals = Vec::new();
        sent.retain(|message| match message {
            Sent::Signal(target, payload) => {
                signals.push((target.clone(), payload.clone()));
                false
            }
            _ => true,
        });
        signals
    }

    fn record(&self, message: Sent) -> Result<(), SignalingError> {
        if *lock(&self.unavailable) {
            return Err(SignalingError::Closed);
        }
        lock(&self.sent).push(message);
        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    async fn join(&self, room: &str) -> Result<(), SignalingError> {
        self.record(Sent::Join(room.to_string()))
    }

    async fn send_signal(&self, target: &PeerId, payload: SignalPayload) -> Result<(), SignalingError> {
        self.record(Sent::Signal(target.clone(), payload))
    }

    async fn send_chat(&self, text: &str, sender_name: &str) -> Result<(), SignalingError> {
        self.record(Sent::Chat {
            text: text.to_string(),
            sender_name: sender_name.to_string(),
        })
    }

    async fn leave(&self) -> Result<(), SignalingError> {
        self.record(Sent::Leave)
    }
}

/// Scripted capture backend
pub struct FakeDevices {
    availability: DeviceAvailability,
    user_media_error: Option<CaptureError>,
    display_error: Option<CaptureError>,
    display_audio: bool,
    requested: Mutex<Vec<MediaConstraints>>,
    display_requests: Mutex<usize>,
}

impl FakeDevices {
    pub fn all_available() -> Self {
        Self {
            availability: DeviceAvailability {
                video: true,
                audio: true,
                screen: true,
            },
            user_media_error: None,
            display_error: None,
            display_audio: false,
            requested: Mutex::new(Vec::new()),
            display_requests: Mutex::new(0),
        }
    }

    pub fn none() -> Self {
        Self {
            availability: DeviceAvailability::default(),
            ..Self::all_available()
        }
    }

    pub fn deny_user_media(mut self) -> Self {
        self.user_media_error = Some(CaptureError::PermissionDenied("camera".to_string()));
        self
    }

    pub fn without_screen(mut self) -> Self {
        self.availability.screen = false;
        self
    }

    pub fn deny_display(mut self) -> Self {
        self.display_error = Some(CaptureError::Cancelled);
        self
    }

    pub fn with_display_audio(mut self) -> Self {
        self.display_audio = true;
        self
    }

    pub fn requested(&self) -> Vec<MediaConstraints> {
        lock(&self.requested).clone()
    }

    pub fn display_requests(&self) -> usize {
        *lock(&self.display_requests)
    }
}

#[async_trait]
impl CaptureDevices for FakeDevices {
    async fn probe(&self) -> DeviceAvailability {
        self.availability
    }

    async fn open_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, CaptureError> {
        lock(&self.requested).push(constraints);
        if let Some(e) = &self.user_media_error {
            return Err(e.clone());
        }

        let id = MediaStream::new_id();
        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, TrackSource::Camera, "fake camera", &id));
        }
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, TrackSource::Microphone, "fake mic", &id));
        }
        Ok(MediaStream::from_tracks(id, tracks))
    }

    async fn open_display(&self) -> Result<MediaStream, CaptureError> {
        *lock(&self.display_requests) += 1;
        if let Some(e) = &self.display_error {
            return Err(e.clone());
        }

        let id = MediaStream::new_id();
        let mut tracks = vec![MediaTrack::new(TrackKind::Video, TrackSource::Screen, "fake screen", &id)];
        if self.display_audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, TrackSource::ScreenAudio, "fake screen audio", &id));
        }
        Ok(MediaStream::from_tracks(id, tracks))
    }
}

/// One participant of a [`Mesh`]
pub struct TestPeer {
    pub id: PeerId,
    pub controller: CallController,
    pub handle: CallHandle,
    pub signaling: Arc<FakeSignaling>,
    pub factory: Arc<FakeTransportFactory>,
    /// Injects inbound signaling events
    pub events: SignalingEventSender,
}

/// Several controllers joined through an in-memory relay
#[derive(Default)]
pub struct Mesh {
    peers: Vec<TestPeer>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every id added and joined in order, with all signaling relayed
    pub async fn connected(ids: &[&str]) -> Self {
        let mut mesh = Self::new();
        for id in ids {
            mesh.add(id, FakeDevices::all_available()).await;
            mesh.join(id).await;
            mesh.pump().await;
        }
        mesh
    }

    pub async fn add(&mut self, id: &str, devices: FakeDevices) {
        let signaling = Arc::new(FakeSignaling::new(id));
        let factory = Arc::new(FakeTransportFactory::default());
        let (events, events_rx) = mpsc::unbounded_channel();

        let mut options = CallOptions::new("room");
        options.negotiation_timeout = Duration::from_secs(1);

        let (mut controller, handle) =
            CallController::new(options, signaling.clone(), events_rx, Arc::new(devices), factory.clone());
        controller.start().await.unwrap();

        self.peers.push(TestPeer {
            id: PeerId::from(id),
            controller,
            handle,
            signaling,
            factory,
            events,
        });
    }

    pub fn peer(&self, id: &str) -> &TestPeer {
        self.peers
            .iter()
            .find(|p| p.id.as_str() == id)
            .unwrap_or_else(|| panic!("no peer {}", id))
    }

    pub fn peer_mut(&mut self, id: &str) -> &mut TestPeer {
        self.peers
            .iter_mut()
            .find(|p| p.id.as_str() == id)
            .unwrap_or_else(|| panic!("no peer {}", id))
    }

    /// Announce `id` to every peer, itself included, as the relay does
    pub async fn join(&mut self, id: &str) {
        let members: Vec<PeerId> = self.peers.iter().map(|p| p.id.clone()).collect();
        for peer in &mut self.peers {
            peer.events
                .send(SignalingEvent::PeerJoined {
                    peer_id: PeerId::from(id),
                    members: members.clone(),
                })
                .unwrap();
            peer.controller.process_pending().await;
        }
    }

    pub async fn leave(&mut self, id: &str) {
        for peer in self.peers.iter_mut().filter(|p| p.id.as_str() != id) {
            peer.events
                .send(SignalingEvent::PeerLeft {
                    peer_id: PeerId::from(id),
                })
                .unwrap();
            peer.controller.process_pending().await;
        }
    }

    /// Relay outbound signals until every peer is idle
    pub async fn pump(&mut self) {
        loop {
            let mut moved = 0;
            for from in &self.peers {
                for (target, payload) in from.signaling.take_signals() {
                    let Some(to) = self.peers.iter().find(|p| p.id == target) else {
                        continue;
                    };
                    for envelope in SignalEnvelope::from_payload(from.id.clone(), payload).unwrap() {
                        to.events.send(SignalingEvent::Signal(envelope)).unwrap();
                    }
                    moved += 1;
                }
            }

            let mut handled = 0;
            for peer in &mut self.peers {
                handled += peer.controller.process_pending().await;
            }

            if moved == 0 && handled == 0 {
                break;
            }
        }
    }
}
