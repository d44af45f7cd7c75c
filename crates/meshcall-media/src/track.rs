use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    pub fn codec_type(&self) -> RTPCodecType {
        match self {
            TrackKind::Audio => RTPCodecType::Audio,
            TrackKind::Video => RTPCodecType::Video,
        }
    }

    pub fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
    ScreenAudio,
    Silence,
    Black,
}

impl TrackSource {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, TrackSource::Silence | TrackSource::Black)
    }

    pub fn is_display(&self) -> bool {
        matches!(self, TrackSource::Screen | TrackSource::ScreenAudio)
    }
}

/// Emitted when a track ends on its own (device unplugged, permission
/// revoked, screen share stopped from outside the call)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEnded {
    pub track_id: String,
    pub kind: TrackKind,
    pub source: TrackSource,
}

pub type TrackEndedSender = mpsc::UnboundedSender<TrackEnded>;

/// A local media track.
///
/// Cloning is cheap and every clone refers to the same track. A track is
/// live until it is stopped locally or ends on its own; only the latter
/// notifies the end-of-track observer.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    label: String,
    enabled: AtomicBool,
    live: AtomicBool,
    observer: Mutex<Option<TrackEndedSender>>,
    local: Arc<TrackLocalStaticSample>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, source: TrackSource, label: impl Into<String>, stream_id: &str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let local = Arc::new(TrackLocalStaticSample::new(
            codec::capability(kind),
            id.clone(),
            stream_id.to_string(),
        ));

        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                source,
                label: label.into(),
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
                observer: Mutex::new(None),
                local,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn stream_id(&self) -> &str {
        self.inner.local.stream_id()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// A disabled track stays attached but carries silence / black frames
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Attach the observer notified when this track ends on its own.
    /// Replaces any previous observer.
    pub fn on_ended(&self, observer: TrackEndedSender) {
        if let Ok(mut slot) = self.inner.observer.lock() {
            *slot = Some(observer);
        }
    }

    /// Stop the track locally. The observer is dropped without being notified.
    pub fn stop(&self) {
        self.inner.live.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.inner.observer.lock() {
            slot.take();
        }
    }

    /// The track ended outside our control. Notifies the observer once.
    pub fn end(&self) {
        if !self.inner.live.swap(false, Ordering::SeqCst) {
            return;
        }

        let observer = match self.inner.observer.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };

        tracing::info!("Local {} track {} ({}) ended", self.kind(), self.id(), self.inner.label);

        if let Some(observer) = observer {
            let _ = observer.send(TrackEnded {
                track_id: self.id().to_string(),
                kind: self.kind(),
                source: self.source(),
            });
        }
    }

    /// Track handle as understood by a peer connection
    pub fn local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.local.clone()
    }

    /// Write an encoded sample. A disabled track sends a blank frame of the
    /// same duration instead; a track that is no longer live sends nothing.
    pub async fn write_sample(&self, sample: &Sample) -> webrtc::error::Result<()> {
        if !self.is_live() {
            return Ok(());
        }
        if self.is_enabled() {
            return self.inner.local.write_sample(sample).await;
        }

        let blank = Sample {
            data: codec::blank_frame(self.kind()).into(),
            duration: sample.duration,
            ..Default::default()
        };
        self.inner.local.write_sample(&blank).await
    }

    /// Feed blank frames at the codec's pace until the track stops or every
    /// handle to it is dropped. Without a runtime nothing is started.
    pub(crate) fn start_blank_source(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime, {} track {} stays without media", self.kind(), self.id());
            return;
        };

        let kind = self.kind();
        let track: Weak<TrackInner> = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            let period = codec::frame_interval(kind);
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(inner) = track.upgrade() else {
                    break;
                };
                let track = MediaTrack { inner };
                if !track.is_live() {
                    break;
                }

                let sample = Sample {
                    data: codec::blank_frame(kind).into(),
                    duration: period,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::debug!("Blank frame on {} dropped: {}", track.id(), e);
                }
            }
        });
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaTrack {}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}
