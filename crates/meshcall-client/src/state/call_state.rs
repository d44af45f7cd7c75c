use std::sync::Arc;

use chrono::{DateTime, Utc};
use meshcall_media::TrackKind;
use meshcall_protocol::{ChatMessage, PeerId};
use tokio::sync::RwLock;

use crate::call::RemoteTrackInfo;

/// Observable state of a call, shared with whatever presents it
#[derive(Debug, Clone)]
pub struct CallState {
    inner: Arc<RwLock<CallStateInner>>,
}

#[derive(Debug)]
pub struct CallStateInner {
    pub local_peer_id: PeerId,
    pub room: String,

    // Signaling
    pub is_connected: bool,

    // Local media flags as last applied
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,

    // One feed per remote peer, in arrival order
    pub remote_feeds: Vec<RemoteFeed>,

    // Chat
    pub chat: Vec<ChatEntry>,
    pub unread_chat: usize,
}

/// Media received from one remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFeed {
    pub peer_id: PeerId,
    pub stream_id: String,
    pub tracks: Vec<RemoteTrackInfo>,
}

impl RemoteFeed {
    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub message: ChatMessage,
    pub is_own: bool,
    pub received_at: DateTime<Utc>,
}

impl CallState {
    pub fn new(local_peer_id: PeerId, room: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CallStateInner {
                local_peer_id,
                room: room.into(),
                is_connected: false,
                video_enabled: false,
                audio_enabled: false,
                screen_sharing: false,
                remote_feeds: Vec::new(),
                chat: Vec::new(),
                unread_chat: 0,
            })),
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, CallStateInner> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, CallStateInner> {
        self.inner.write().await
    }

    pub async fn set_connected(&self, connected: bool) {
        self.inner.write().await.is_connected = connected;
    }

    pub async fn set_media(&self, video_enabled: bool, audio_enabled: bool, screen_sharing: bool) {
        let mut state = self.inner.write().await;
        state.video_enabled = video_enabled;
        state.audio_enabled = audio_enabled;
        state.screen_sharing = screen_sharing;
    }

    /// Record an inbound track. A new stream id from the same peer replaces
    /// that peer's feed; a repeated track id is not added twice.
    pub async fn upsert_remote_track(&self, peer_id: &PeerId, track: RemoteTrackInfo) {
        let mut state = self.inner.write().await;
        let feeds = &mut state.remote_feeds;

        if let Some(feed) = feeds.iter_mut().find(|f| f.peer_id == *peer_id) {
            if feed.stream_id == track.stream_id {
                feed.tracks.retain(|t| t.track_id != track.track_id);
                feed.tracks.push(track);
            } else {
                feed.stream_id = track.stream_id.clone();
                feed.tracks = vec![track];
            }
            return;
        }

        feeds.push(RemoteFeed {
            peer_id: peer_id.clone(),
            stream_id: track.stream_id.clone(),
            tracks: vec![track],
        });
    }

    pub async fn remove_feed(&self, peer_id: &PeerId) -> bool {
        let mut state = self.inner.write().await;
        let before = state.remote_feeds.len();
        state.remote_feeds.retain(|f| f.peer_id != *peer_id);
        state.remote_feeds.len() != before
    }

    pub async fn clear_feeds(&self) {
        self.inner.write().await.remote_feeds.clear();
    }

    pub async fn add_chat(&self, message: ChatMessage) {
        let mut state = self.inner.write().await;
        let is_own = message.sender_peer_id == state.local_peer_id;
        if !is_own {
            state.unread_chat += 1;
        }
        state.chat.push(ChatEntry {
            message,
            is_own,
            received_at: Utc::now(),
        });
    }

    pub async fn mark_chat_read(&self) {
        self.inner.write().await.unread_chat = 0;
    }
}
