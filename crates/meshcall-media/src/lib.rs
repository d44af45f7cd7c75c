//! Media model for Meshcall
//!
//! This crate provides the local side of a call's media:
//! - Tracks and streams with enable flags and end-of-track notification
//! - Synthetic silence / black fallback media
//! - Codec capabilities shared with the peer connections

pub mod codec;
pub mod stream;
pub mod synthetic;
pub mod track;

use thiserror::Error;

pub use stream::MediaStream;
pub use track::{MediaTrack, TrackEnded, TrackEndedSender, TrackKind, TrackSource};

/// Failure to obtain media from a capture device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No capture device found: {0}")]
    NotFound(String),

    #[error("Capture cancelled by user")]
    Cancelled,

    #[error("Capture device error: {0}")]
    Device(String),
}
