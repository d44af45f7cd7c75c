use crate::track::{MediaTrack, TrackKind, TrackSource};

/// A set of local tracks published together.
///
/// Replaced wholesale when switching between camera/microphone, screen
/// capture and fallback media; never merged.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Fresh stream id; tracks must be created with it before the stream
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn from_tracks(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self { id: id.into(), tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn first(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks_of(kind).next()
    }

    pub fn contains_track(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|t| t.id() == track_id)
    }

    /// True when every track is synthesized rather than captured
    pub fn is_synthetic(&self) -> bool {
        self.tracks.iter().all(|t| t.source().is_synthetic())
    }

    pub fn is_display(&self) -> bool {
        self.tracks.iter().any(|t| t.source() == TrackSource::Screen)
    }

    /// Enable or disable the first track of `kind`. Returns false when the
    /// stream has no such track.
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        match self.first(kind) {
            Some(track) => {
                track.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Stop every track and release the devices behind them
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
