use async_trait::async_trait;
use meshcall_media::{CaptureError, MediaStream};

/// Which capture sources the platform reports as usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceAvailability {
    pub video: bool,
    pub audio: bool,
    pub screen: bool,
}

/// Kinds requested from the camera/microphone backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn is_empty(&self) -> bool {
        !self.video && !self.audio
    }
}

/// Capture backend. Implementations own the platform devices; the tracks
/// they hand out must call [`meshcall_media::MediaTrack::end`] when the
/// device goes away.
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    async fn probe(&self) -> DeviceAvailability;

    async fn open_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, CaptureError>;

    async fn open_display(&self) -> Result<MediaStream, CaptureError>;
}

/// Backend for hosts without capture hardware. Every request is refused,
/// so the call runs on synthetic media.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessDevices;

#[async_trait]
impl CaptureDevices for HeadlessDevices {
    async fn probe(&self) -> DeviceAvailability {
        DeviceAvailability::default()
    }

    async fn open_user_media(&self, _constraints: MediaConstraints) -> Result<MediaStream, CaptureError> {
        Err(CaptureError::NotFound("no camera or microphone on a headless host".to_string()))
    }

    async fn open_display(&self) -> Result<MediaStream, CaptureError> {
        Err(CaptureError::NotFound("no display to capture on a headless host".to_string()))
    }
}
