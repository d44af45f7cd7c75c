//! Transport sessions backed by webrtc-rs peer connections

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use meshcall_media::{codec, MediaTrack, TrackKind};
use meshcall_protocol::{IceCandidate, IceServer, PeerId, SdpKind, SessionDescription};
use tokio::sync::RwLock;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use super::transport::{
    ConnectionState, RemoteTrackInfo, SessionKey, TransportEvent, TransportEventSender, TransportFactory,
    TransportSession,
};

/// Builds one peer connection per remote participant from a shared API
pub struct WebRtcTransportFactory {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: &[IceServer]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        codec::register_codecs(&mut media_engine)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
        })
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create_session(
        &self,
        key: &SessionKey,
        events: TransportEventSender,
    ) -> Result<Arc<dyn TransportSession>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = open_connection(&self.api, config.clone(), key, &events).await?;
        tracing::info!("Created peer connection for {}", key);

        Ok(Arc::new(WebRtcSession {
            key: key.clone(),
            api: self.api.clone(),
            config,
            events,
            pc: RwLock::new(pc),
        }))
    }
}

/// New peer connection whose callbacks report as `key`
async fn open_connection(
    api: &API,
    config: RTCConfiguration,
    key: &SessionKey,
    events: &TransportEventSender,
) -> Result<Arc<RTCPeerConnection>> {
    let pc = Arc::new(api.new_peer_connection(config).await?);

    let ice_tx = events.clone();
    let ice_key = key.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = ice_tx.clone();
        let session = ice_key.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(json) => {
                    let _ = tx.send(TransportEvent::LocalCandidate {
                        session,
                        candidate: IceCandidate {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                            username_fragment: json.username_fragment,
                        },
                    });
                }
                Err(e) => tracing::warn!("Failed to serialize ICE candidate for {}: {}", session, e),
            }
        })
    }));

    let track_tx = events.clone();
    let track_key = key.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let tx = track_tx.clone();
        let session = track_key.clone();
        Box::pin(async move {
            let Some(kind) = TrackKind::from_codec_type(track.kind()) else {
                tracing::warn!("Ignoring remote track of unknown kind from {}", session);
                return;
            };
            tracing::info!(
                "Remote {} track {} (stream {}) from {}",
                kind,
                track.id(),
                track.stream_id(),
                session
            );
            let _ = tx.send(TransportEvent::RemoteTrack {
                session,
                track: RemoteTrackInfo {
                    track_id: track.id().to_string(),
                    stream_id: track.stream_id().to_string(),
                    kind,
                },
            });
        })
    }));

    let state_tx = events.clone();
    let state_key = key.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let tx = state_tx.clone();
        let session = state_key.clone();
        Box::pin(async move {
            tracing::debug!("Connection to {} is now {}", session, state);
            let state = match state {
                RTCPeerConnectionState::New => ConnectionState::New,
                RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                RTCPeerConnectionState::Connected => ConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => ConnectionState::Failed,
                RTCPeerConnectionState::Closed => ConnectionState::Closed,
                _ => return,
            };
            let _ = tx.send(TransportEvent::ConnectionState { session, state });
        })
    }));

    Ok(pc)
}

/// Close a connection that has been replaced. Its callbacks are detached
/// first so the session does not see its own replacement as a hangup.
async fn retire(pc: &RTCPeerConnection) -> Result<()> {
    pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
    pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
    pc.on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
    pc.close().await?;
    Ok(())
}

struct WebRtcSession {
    key: SessionKey,
    api: Arc<API>,
    config: RTCConfiguration,
    events: TransportEventSender,
    pc: RwLock<Arc<RTCPeerConnection>>,
}

impl WebRtcSession {
    fn peer_id(&self) -> &PeerId {
        &self.key.peer_id
    }

    async fn connection(&self) -> Arc<RTCPeerConnection> {
        self.pc.read().await.clone()
    }

    /// Nothing was ever agreed with the peer, so the pending offer is
    /// dropped together with the connection that made it. Outbound tracks
    /// move to the replacement.
    async fn reopen(&self) -> Result<()> {
        let mut slot = self.pc.write().await;

        let mut tracks = Vec::new();
        for sender in slot.get_senders().await {
            if let Some(track) = sender.track().await {
                tracks.push(track);
            }
        }

        let fresh = open_connection(&self.api, self.config.clone(), &self.key, &self.events).await?;
        for track in tracks {
            fresh.add_track(track).await?;
        }

        let old = std::mem::replace(&mut *slot, fresh);
        drop(slot);

        retire(&old).await?;
        tracing::info!("Replaced unnegotiated peer connection for {}", self.key);
        Ok(())
    }

    /// The connection is live, so it is kept. The pending offer is closed
    /// against the last description the peer agreed to, which changes
    /// neither ICE credentials nor the DTLS transport.
    async fn settle_pending_offer(&self, pc: &RTCPeerConnection, agreed: RTCSessionDescription) -> Result<()> {
        let settle = RTCSessionDescription::answer(agreed.sdp)?;
        pc.set_remote_description(settle).await?;
        tracing::info!("Settled pending offer for {} on the agreed description", self.key);
        Ok(())
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
        SdpKind::Rollback => bail!("rollback is a local operation, not a description to apply"),
    };
    Ok(rtc)
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        other => bail!("unsupported session description type {}", other),
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

#[async_trait]
impl TransportSession for WebRtcSession {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        self.connection().await.add_track(track.local()).await?;
        Ok(())
    }

    async fn remove_outbound_tracks(&self) -> Result<usize> {
        let pc = self.connection().await;
        let mut removed = 0;
        for sender in pc.get_senders().await {
            if sender.track().await.is_some() {
                pc.remove_track(&sender).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn replace_outbound_track(&self, track: &MediaTrack) -> Result<bool> {
        let wanted = track.kind().codec_type();
        for sender in self.connection().await.get_senders().await {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.kind() == wanted {
                sender.replace_track(Some(track.local())).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        from_rtc(self.connection().await.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        from_rtc(self.connection().await.create_answer(None).await?)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.connection().await.set_local_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.connection().await.set_remote_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.connection()
            .await
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    // webrtc-rs has no local rollback out of have-local-offer
    async fn rollback(&self) -> Result<()> {
        let pc = self.connection().await;
        let state = pc.signaling_state();
        if state != RTCSignalingState::HaveLocalOffer {
            bail!("rollback for {} in signaling state {}", self.peer_id(), state);
        }

        let result = match pc.current_remote_description().await {
            Some(agreed) => self.settle_pending_offer(&pc, agreed).await,
            None => self.reopen().await,
        };
        result.map_err(|e| anyhow!("rollback for {} failed: {}", self.peer_id(), e))
    }

    async fn close(&self) -> Result<()> {
        self.connection().await.close().await?;
        tracing::info!("Closed peer connection for {}", self.peer_id());
        Ok(())
    }
}
