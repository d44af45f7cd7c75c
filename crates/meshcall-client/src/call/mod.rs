//! Call core: peer sessions, negotiation and local media sync
//!
//! [`CallController`] runs a single event loop. Signaling traffic, transport
//! callbacks, local track endings and user commands are all queued and
//! handled one at a time, so no two handlers ever run concurrently.

pub mod negotiation;
pub mod registry;
pub mod session;
pub mod sync;
pub mod transport;
pub mod webrtc_transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use meshcall_media::TrackEnded;
use tokio::sync::mpsc;

pub use negotiation::{GlarePolicy, NegotiationEngine};
pub use registry::{JoinOutcome, SessionRegistry};
pub use session::{NegotiationState, PeerSession};
pub use sync::{SyncReport, TrackSyncCoordinator};
pub use transport::{
    ConnectionState, RemoteTrackInfo, SessionKey, TransportEvent, TransportEventReceiver, TransportEventSender,
    TransportFactory, TransportSession,
};
pub use webrtc_transport::WebRtcTransportFactory;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::media::{CaptureDevices, LocalStreamReader, MediaSourceProvider, StreamChange};
use crate::network::{SignalingChannel, SignalingEvent, SignalingEventReceiver};
use crate::state::CallState;

/// User intents delivered to a running call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    ToggleVideo,
    ToggleAudio,
    ToggleScreenShare,
    SendChat(String),
    EndCall,
}

/// Cloneable sender for [`CallCommand`]s. Every method returns `false`
/// once the call has ended.
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallCommand>,
}

impl CallHandle {
    pub fn send(&self, command: CallCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn toggle_video(&self) -> bool {
        self.send(CallCommand::ToggleVideo)
    }

    pub fn toggle_audio(&self) -> bool {
        self.send(CallCommand::ToggleAudio)
    }

    pub fn toggle_screen_share(&self) -> bool {
        self.send(CallCommand::ToggleScreenShare)
    }

    pub fn send_chat(&self, text: impl Into<String>) -> bool {
        self.send(CallCommand::SendChat(text.into()))
    }

    pub fn end_call(&self) -> bool {
        self.send(CallCommand::EndCall)
    }
}

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub room: String,
    pub display_name: String,
    pub start_with_video: bool,
    pub start_with_audio: bool,
    pub negotiation_timeout: Duration,
    pub glare_policy: GlarePolicy,
}

impl CallOptions {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            display_name: "guest".to_string(),
            start_with_video: true,
            start_with_audio: true,
            negotiation_timeout: Duration::from_secs(10),
            glare_policy: GlarePolicy::default(),
        }
    }
}

impl From<&ClientConfig> for CallOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            room: config.room.clone(),
            display_name: config.display_name.clone(),
            start_with_video: config.start_with_video,
            start_with_audio: config.start_with_audio,
            negotiation_timeout: config.negotiation_timeout(),
            glare_policy: config.glare_policy,
        }
    }
}

/// Everything the event loop reacts to
#[derive(Debug)]
pub enum CallEvent {
    Signaling(SignalingEvent),
    Transport(TransportEvent),
    TrackEnded(TrackEnded),
    Command(CallCommand),
}

pub struct CallController {
    options: CallOptions,
    signaling: Arc<dyn SignalingChannel>,
    signaling_rx: SignalingEventReceiver,
    transport_rx: TransportEventReceiver,
    ended_rx: mpsc::UnboundedReceiver<TrackEnded>,
    command_rx: mpsc::UnboundedReceiver<CallCommand>,
    registry: SessionRegistry,
    sync: TrackSyncCoordinator,
    media: MediaSourceProvider,
    state: CallState,
    running: bool,
}

impl CallController {
    pub fn new(
        options: CallOptions,
        signaling: Arc<dyn SignalingChannel>,
        signaling_rx: SignalingEventReceiver,
        devices: Arc<dyn CaptureDevices>,
        factory: Arc<dyn TransportFactory>,
    ) -> (Self, CallHandle) {
        let local_peer_id = signaling.local_peer_id().clone();

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let engine = Arc::new(NegotiationEngine::new(
            signaling.clone(),
            options.glare_policy,
            options.negotiation_timeout,
        ));

        let controller = Self {
            registry: SessionRegistry::new(local_peer_id.clone(), factory, transport_tx),
            sync: TrackSyncCoordinator::new(engine),
            media: MediaSourceProvider::new(devices, ended_tx),
            state: CallState::new(local_peer_id, options.room.clone()),
            options,
            signaling,
            signaling_rx,
            transport_rx,
            ended_rx,
            command_rx,
            running: true,
        };

        (controller, CallHandle { tx: command_tx })
    }

    pub fn state(&self) -> CallState {
        self.state.clone()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn media(&self) -> &MediaSourceProvider {
        &self.media
    }

    pub fn local_stream(&self) -> LocalStreamReader {
        self.media.reader()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Acquire local media, then join the room
    pub async fn start(&mut self) -> Result<()> {
        self.media.probe_permissions().await;
        self.media
            .acquire(self.options.start_with_video, self.options.start_with_audio)
            .await;
        self.publish_media_state().await;

        self.signaling.join(&self.options.room).await?;
        self.state.set_connected(true).await;
        tracing::info!("Joined room {} as {}", self.options.room, self.signaling.local_peer_id());
        Ok(())
    }

    /// Handle events until the call ends
    pub async fn run(mut self) {
        while self.running {
            let event = tokio::select! {
                Some(event) = self.signaling_rx.recv() => CallEvent::Signaling(event),
                Some(event) = self.transport_rx.recv() => CallEvent::Transport(event),
                Some(ended) = self.ended_rx.recv() => CallEvent::TrackEnded(ended),
                Some(command) = self.command_rx.recv() => CallEvent::Command(command),
                else => break,
            };
            self.dispatch(event).await;
        }
        tracing::info!("Call loop finished");
    }

    /// Handle every event already queued, without waiting for more.
    /// Returns how many were handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while self.running {
            let Some(event) = self.try_next_event() else {
                break;
            };
            self.dispatch(event).await;
            handled += 1;
        }
        handled
    }

    fn try_next_event(&mut self) -> Option<CallEvent> {
        if let Ok(event) = self.signaling_rx.try_recv() {
            return Some(CallEvent::Signaling(event));
        }
        if let Ok(event) = self.transport_rx.try_recv() {
            return Some(CallEvent::Transport(event));
        }
        if let Ok(ended) = self.ended_rx.try_recv() {
            return Some(CallEvent::TrackEnded(ended));
        }
        if let Ok(command) = self.command_rx.try_recv() {
            return Some(CallEvent::Command(command));
        }
        None
    }

    /// Returns whether the call is still running
    pub async fn dispatch(&mut self, event: CallEvent) -> bool {
        match event {
            CallEvent::Signaling(event) => self.handle_signaling(event).await,
            CallEvent::Transport(event) => self.handle_transport(event).await,
            CallEvent::TrackEnded(ended) => self.handle_track_ended(ended).await,
            CallEvent::Command(command) => self.handle_command(command).await,
        }
        self.running
    }

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::PeerJoined { peer_id, members } => {
                let stream = self.media.current_stream();
                let outcome = self.registry.on_joined(&peer_id, &members, &stream).await;

                // The newcomer offers to everyone already present
                if outcome.local_joined {
                    let engine = self.sync.engine().clone();
                    for peer in self.registry.peer_ids() {
                        if let Err(e) = engine.initiate_offer(&mut self.registry, &peer).await {
                            tracing::warn!("Initial offer to {} failed: {}", peer, e);
                        }
                    }
                }
            }
            SignalingEvent::PeerLeft { peer_id } => {
                self.registry.on_left(&peer_id).await;
                self.state.remove_feed(&peer_id).await;
            }
            SignalingEvent::Signal(envelope) => {
                if envelope.peer_id == *self.registry.local_peer_id() {
                    tracing::debug!("Ignoring signal from ourselves");
                    return;
                }
                let peer_id = envelope.peer_id.clone();
                let engine = self.sync.engine().clone();
                if let Err(e) = engine.handle_remote_signal(&mut self.registry, envelope).await {
                    tracing::warn!("Signal from {} not applied: {}", peer_id, e);
                }
            }
            SignalingEvent::Chat(message) => {
                self.state.add_chat(message).await;
            }
            SignalingEvent::Disconnected => {
                tracing::error!(
                    "Signaling channel lost; keeping {} existing sessions",
                    self.registry.len()
                );
                self.state.set_connected(false).await;
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate { session, candidate } => {
                if !self.registry.is_current(&session) {
                    return;
                }
                let engine = self.sync.engine().clone();
                if let Err(e) = engine
                    .send_local_candidate(&self.registry, &session.peer_id, candidate)
                    .await
                {
                    tracing::error!("Failed to send candidate to {}: {}", session.peer_id, e);
                }
            }
            TransportEvent::RemoteTrack { session, track } => {
                if self.registry.is_current(&session) {
                    self.state.upsert_remote_track(&session.peer_id, track).await;
                }
            }
            TransportEvent::ConnectionState { session, state } => match state {
                ConnectionState::Failed | ConnectionState::Closed => {
                    if !self.registry.is_current(&session) {
                        tracing::debug!("Connection {} is {:?} after removal", session, state);
                        return;
                    }
                    let reason = if state == ConnectionState::Failed {
                        "connection failed"
                    } else {
                        "connection closed"
                    };
                    self.registry.destroy(&session.peer_id, reason).await;
                    self.state.remove_feed(&session.peer_id).await;
                }
                ConnectionState::Connected => tracing::info!("Connected to {}", session.peer_id),
                other => tracing::debug!("Connection {} is {:?}", session, other),
            },
        }
    }

    async fn handle_track_ended(&mut self, ended: TrackEnded) {
        if let Some(change) = self.media.on_track_ended(ended).await {
            self.apply(change).await;
        }
        self.publish_media_state().await;
    }

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::ToggleVideo => {
                if let Some(change) = self.media.toggle_video().await {
                    self.apply(change).await;
                }
                self.publish_media_state().await;
            }
            CallCommand::ToggleAudio => {
                if let Some(change) = self.media.toggle_audio().await {
                    self.apply(change).await;
                }
                self.publish_media_state().await;
            }
            CallCommand::ToggleScreenShare => {
                let on = !self.media.is_screen_sharing();
                let change = self.media.set_screen_sharing(on).await;
                self.apply(change).await;
                self.publish_media_state().await;
            }
            CallCommand::SendChat(text) => {
                if let Err(e) = self.signaling.send_chat(&text, &self.options.display_name).await {
                    tracing::error!("Failed to send chat message: {}", e);
                }
            }
            CallCommand::EndCall => self.end_call().await,
        }
    }

    /// Push the provider's current stream to every session
    async fn apply(&mut self, change: StreamChange) {
        let stream = self.media.current_stream();
        let report = match change {
            StreamChange::UserMedia => self.sync.push_local_stream(&mut self.registry, &stream).await,
            StreamChange::Display => self.sync.push_display_stream(&mut self.registry, &stream).await,
        };
        if !report.failed.is_empty() {
            tracing::warn!("{} sessions kept stale media after sync", report.failed.len());
        }
    }

    async fn publish_media_state(&self) {
        let local = self.media.state();
        self.state
            .set_media(local.video_enabled, local.audio_enabled, local.screen_sharing)
            .await;
    }

    async fn end_call(&mut self) {
        tracing::info!("Ending call");
        self.media.stop_all();
        self.sync.stop();
        self.registry.terminate_all().await;
        self.state.clear_feeds().await;

        if let Err(e) = self.signaling.leave().await {
            tracing::warn!("Failed to leave room: {}", e);
        }
        self.state.set_connected(false).await;
        self.running = false;
    }
}
