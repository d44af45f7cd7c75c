//! Synthetic media used whenever no real capture is available
//!
//! Every fallback track starts disabled, so peers see a muted microphone and
//! a blank picture while the session keeps its audio + video shape. Each one
//! feeds itself blank frames so the remote side receives RTP and reports the
//! track.

use crate::stream::MediaStream;
use crate::track::{MediaTrack, TrackKind, TrackSource};

/// Disabled silent audio track in its own stream
pub fn silence_track() -> MediaTrack {
    let stream_id = MediaStream::new_id();
    silence_track_in(&stream_id)
}

fn silence_track_in(stream_id: &str) -> MediaTrack {
    let track = MediaTrack::new(TrackKind::Audio, TrackSource::Silence, "silence", stream_id);
    track.set_enabled(false);
    track.start_blank_source();
    track
}

fn black_track_in(stream_id: &str) -> MediaTrack {
    let track = MediaTrack::new(TrackKind::Video, TrackSource::Black, "black", stream_id);
    track.set_enabled(false);
    track.start_blank_source();
    track
}

/// Black video + silent audio, both disabled
pub fn fallback_stream() -> MediaStream {
    let id = MediaStream::new_id();
    let tracks = vec![black_track_in(&id), silence_track_in(&id)];
    MediaStream::from_tracks(id, tracks)
}

/// Add a disabled black or silent track for each kind `stream` lacks,
/// keeping one audio and one video track in every outbound stream.
pub fn pad_missing(stream: MediaStream) -> MediaStream {
    let mut tracks = stream.tracks().to_vec();
    if stream.first(TrackKind::Video).is_none() {
        tracks.push(black_track_in(stream.id()));
    }
    if stream.first(TrackKind::Audio).is_none() {
        tracks.push(silence_track_in(stream.id()));
    }
    MediaStream::from_tracks(stream.id(), tracks)
}
