//! Media Source Provider
//!
//! Sole owner of the local stream. Exactly one stream is current at any
//! time and it is replaced wholesale on every switch. Readers get a
//! [`LocalStreamReader`] and re-read it whenever they need tracks.

use std::sync::Arc;

use meshcall_media::{synthetic, CaptureError, MediaStream, TrackEnded, TrackEndedSender, TrackKind};
use tokio::sync::watch;

use super::devices::{CaptureDevices, DeviceAvailability, MediaConstraints};
use crate::error::CallError;

/// Snapshot of what is being sent
#[derive(Debug, Clone)]
pub struct LocalMediaState {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
    pub current_stream: MediaStream,
}

/// How a new current stream must reach the peer sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChange {
    /// Camera, microphone or fallback: replace every outbound track
    UserMedia,
    /// Screen capture: swap tracks in place
    Display,
}

/// Read-only view of the current local stream
#[derive(Debug, Clone)]
pub struct LocalStreamReader {
    rx: watch::Receiver<MediaStream>,
}

impl LocalStreamReader {
    pub fn current(&self) -> MediaStream {
        self.rx.borrow().clone()
    }

    /// Wait for the next replacement; `false` once the provider is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

pub struct MediaSourceProvider {
    devices: Arc<dyn CaptureDevices>,
    availability: DeviceAvailability,
    video_enabled: bool,
    audio_enabled: bool,
    screen_sharing: bool,
    stream_tx: watch::Sender<MediaStream>,
    ended_tx: TrackEndedSender,
}

impl MediaSourceProvider {
    /// Starts on fallback media until the first `acquire`
    pub fn new(devices: Arc<dyn CaptureDevices>, ended_tx: TrackEndedSender) -> Self {
        let (stream_tx, _) = watch::channel(synthetic::fallback_stream());
        Self {
            devices,
            availability: DeviceAvailability::default(),
            video_enabled: false,
            audio_enabled: false,
            screen_sharing: false,
            stream_tx,
            ended_tx,
        }
    }

    pub fn state(&self) -> LocalMediaState {
        LocalMediaState {
            video_enabled: self.video_enabled,
            audio_enabled: self.audio_enabled,
            screen_sharing: self.screen_sharing,
            current_stream: self.current_stream(),
        }
    }

    pub fn availability(&self) -> DeviceAvailability {
        self.availability
    }

    pub fn reader(&self) -> LocalStreamReader {
        LocalStreamReader {
            rx: self.stream_tx.subscribe(),
        }
    }

    pub fn current_stream(&self) -> MediaStream {
        self.stream_tx.borrow().clone()
    }

    pub async fn probe_permissions(&mut self) -> DeviceAvailability {
        self.availability = self.devices.probe().await;
        tracing::info!(
            "Capture availability: video={} audio={} screen={}",
            self.availability.video,
            self.availability.audio,
            self.availability.screen
        );
        self.availability
    }

    /// Switch to camera/microphone capture. Never fails: any capture error
    /// yields the synthetic fallback stream instead.
    pub async fn acquire(&mut self, want_video: bool, want_audio: bool) -> MediaStream {
        self.video_enabled = want_video;
        self.audio_enabled = want_audio;

        // Release real devices before asking for them again
        self.current_stream().stop();

        let constraints = MediaConstraints {
            video: want_video && self.availability.video,
            audio: want_audio && self.availability.audio,
        };

        let stream = if constraints.is_empty() {
            tracing::debug!("No capture requested or available, using fallback media");
            self.build_fallback()
        } else {
            match self.devices.open_user_media(constraints).await {
                Ok(stream) => synthetic::pad_missing(stream),
                Err(e) => {
                    tracing::warn!("{}; using fallback media", CallError::from(e));
                    self.build_fallback()
                }
            }
        };

        self.install(stream.clone());
        stream
    }

    /// Switch to screen capture. On refusal the current stream is kept and
    /// the caller is expected to fall back to [`Self::acquire`]. Screen
    /// capture is not attempted when permissions showed it unavailable.
    pub async fn acquire_display(&mut self) -> Result<MediaStream, CaptureError> {
        if !self.availability.screen {
            self.screen_sharing = false;
            return Err(CaptureError::NotFound("screen capture unavailable".to_string()));
        }

        match self.devices.open_display().await {
            Ok(stream) => {
                self.screen_sharing = true;
                self.install(stream.clone());
                Ok(stream)
            }
            Err(e) => {
                self.screen_sharing = false;
                Err(e)
            }
        }
    }

    /// Disabled black video and silent audio
    pub fn build_fallback(&self) -> MediaStream {
        synthetic::fallback_stream()
    }

    fn install(&mut self, stream: MediaStream) {
        let previous = self.stream_tx.borrow().clone();
        if previous.id() != stream.id() {
            previous.stop();
        }

        for track in stream.tracks() {
            track.on_ended(self.ended_tx.clone());
        }

        tracing::info!(
            "Local stream is now {} ({} tracks{})",
            stream.id(),
            stream.tracks().len(),
            if stream.is_synthetic() { ", synthetic" } else { "" }
        );
        self.stream_tx.send_replace(stream);
    }

    /// Returns the change to push to peers, if any
    pub async fn toggle_video(&mut self) -> Option<StreamChange> {
        self.toggle(TrackKind::Video).await
    }

    pub async fn toggle_audio(&mut self) -> Option<StreamChange> {
        self.toggle(TrackKind::Audio).await
    }

    async fn toggle(&mut self, kind: TrackKind) -> Option<StreamChange> {
        let enabled = match kind {
            TrackKind::Video => {
                self.video_enabled = !self.video_enabled;
                self.video_enabled
            }
            TrackKind::Audio => {
                self.audio_enabled = !self.audio_enabled;
                self.audio_enabled
            }
        };
        tracing::info!("Local {} turned {}", kind, if enabled { "on" } else { "off" });

        // Applied when sharing stops
        if self.screen_sharing {
            return None;
        }

        self.current_stream().set_enabled(kind, enabled);
        self.acquire(self.video_enabled, self.audio_enabled).await;
        Some(StreamChange::UserMedia)
    }

    /// Start or stop screen sharing
    pub async fn set_screen_sharing(&mut self, on: bool) -> StreamChange {
        if on {
            match self.acquire_display().await {
                Ok(_) => return StreamChange::Display,
                Err(e) => tracing::warn!("Screen capture refused: {}", e),
            }
        }

        self.screen_sharing = false;
        self.acquire(self.video_enabled, self.audio_enabled).await;
        StreamChange::UserMedia
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing
    }

    /// React to a track that ended outside our control
    pub async fn on_track_ended(&mut self, ended: TrackEnded) -> Option<StreamChange> {
        if !self.current_stream().contains_track(&ended.track_id) {
            tracing::debug!("Ignoring end of stale track {}", ended.track_id);
            return None;
        }

        if ended.source.is_display() {
            tracing::info!("Screen capture ended");
            self.screen_sharing = false;
        } else {
            tracing::warn!("Local {} source ended unexpectedly", ended.kind);
            match ended.kind {
                TrackKind::Video => self.video_enabled = false,
                TrackKind::Audio => self.audio_enabled = false,
            }
        }

        self.acquire(self.video_enabled, self.audio_enabled).await;
        Some(StreamChange::UserMedia)
    }

    /// Release every local track; used when the call ends
    pub fn stop_all(&mut self) {
        self.current_stream().stop();
        self.screen_sharing = false;
    }
}
