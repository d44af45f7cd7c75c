//! Pushes local media changes into every peer session
//!
//! Any change to the tracks attached to a session is followed by exactly
//! one offer to that peer. A failure on one peer never stops the others.

use std::sync::Arc;

use meshcall_media::{synthetic, MediaStream, MediaTrack, TrackKind};
use meshcall_protocol::PeerId;

use super::negotiation::NegotiationEngine;
use super::registry::SessionRegistry;
use crate::error::{CallError, NegotiationStage, Result};

/// Per-peer outcome of one synchronization cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub renegotiated: Vec<PeerId>,
    pub failed: Vec<PeerId>,
}

impl SyncReport {
    fn record(&mut self, peer_id: PeerId, result: Result<()>) {
        match result {
            Ok(()) => self.renegotiated.push(peer_id),
            Err(e) => {
                tracing::warn!("Track sync with {} failed: {}", peer_id, e);
                self.failed.push(peer_id);
            }
        }
    }
}

pub struct TrackSyncCoordinator {
    engine: Arc<NegotiationEngine>,
    /// Sent in place of audio when a display stream carries none
    silence: MediaTrack,
}

impl TrackSyncCoordinator {
    pub fn new(engine: Arc<NegotiationEngine>) -> Self {
        Self {
            engine,
            silence: synthetic::silence_track(),
        }
    }

    pub fn engine(&self) -> &Arc<NegotiationEngine> {
        &self.engine
    }

    /// Replace every session's outbound tracks with the tracks of `stream`
    /// and renegotiate.
    pub async fn push_local_stream(&self, registry: &mut SessionRegistry, stream: &MediaStream) -> SyncReport {
        let mut report = SyncReport::default();
        for peer_id in registry.peer_ids() {
            let result = self.sync_session(registry, &peer_id, stream).await;
            report.record(peer_id, result);
        }
        tracing::info!(
            "Pushed stream {} to {} sessions ({} failed)",
            stream.id(),
            report.renegotiated.len() + report.failed.len(),
            report.failed.len()
        );
        report
    }

    async fn sync_session(&self, registry: &mut SessionRegistry, peer_id: &PeerId, stream: &MediaStream) -> Result<()> {
        let connection = registry
            .connection(peer_id)
            .ok_or_else(|| CallError::UnknownPeer(peer_id.clone()))?;

        let mut track_result = self
            .engine
            .bounded(peer_id, NegotiationStage::UpdateTracks, connection.remove_outbound_tracks())
            .await
            .map(|removed| tracing::debug!("Detached {} tracks from {}", removed, peer_id));

        if track_result.is_ok() {
            for track in stream.tracks() {
                track_result = self
                    .engine
                    .bounded(peer_id, NegotiationStage::UpdateTracks, connection.add_track(track))
                    .await;
                if track_result.is_err() {
                    break;
                }
            }
        }

        // The track set may have changed even if a step failed
        let offer_result = self.engine.initiate_offer(registry, peer_id).await;
        track_result.and(offer_result)
    }

    /// Swap the outbound video track of one session in place
    pub async fn replace_video_track(
        &self,
        registry: &SessionRegistry,
        peer_id: &PeerId,
        stream: &MediaStream,
    ) -> Result<()> {
        match stream.first(TrackKind::Video) {
            Some(track) => self.replace_track(registry, peer_id, track).await,
            None => {
                tracing::warn!("Stream {} has no video track for {}", stream.id(), peer_id);
                Ok(())
            }
        }
    }

    /// Swap the outbound audio track of one session in place, sending
    /// silence when `stream` has no audio.
    pub async fn replace_audio_track(
        &self,
        registry: &SessionRegistry,
        peer_id: &PeerId,
        stream: &MediaStream,
    ) -> Result<()> {
        let track = stream.first(TrackKind::Audio).unwrap_or(&self.silence);
        self.replace_track(registry, peer_id, track).await
    }

    async fn replace_track(&self, registry: &SessionRegistry, peer_id: &PeerId, track: &MediaTrack) -> Result<()> {
        let connection = registry
            .connection(peer_id)
            .ok_or_else(|| CallError::UnknownPeer(peer_id.clone()))?;

        let replaced = self
            .engine
            .bounded(
                peer_id,
                NegotiationStage::UpdateTracks,
                connection.replace_outbound_track(track),
            )
            .await?;

        if !replaced {
            tracing::debug!("No {} sender for {}, adding track", track.kind(), peer_id);
            self.engine
                .bounded(peer_id, NegotiationStage::UpdateTracks, connection.add_track(track))
                .await?;
        }
        Ok(())
    }

    /// Switch every session to a screen capture stream: video and audio
    /// are replaced in place, then each peer gets one offer.
    pub async fn push_display_stream(&self, registry: &mut SessionRegistry, stream: &MediaStream) -> SyncReport {
        let mut report = SyncReport::default();
        for peer_id in registry.peer_ids() {
            let video = self.replace_video_track(registry, &peer_id, stream).await;
            let audio = self.replace_audio_track(registry, &peer_id, stream).await;
            let offer = self.engine.initiate_offer(registry, &peer_id).await;
            report.record(peer_id, video.and(audio).and(offer));
        }
        tracing::info!(
            "Pushed display stream {} to {} sessions ({} failed)",
            stream.id(),
            report.renegotiated.len() + report.failed.len(),
            report.failed.len()
        );
        report
    }

    pub fn stop(&self) {
        self.silence.stop();
    }
}
