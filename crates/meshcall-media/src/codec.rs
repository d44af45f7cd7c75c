//! Codec capabilities
//!
//! One audio and one video codec, shared by the local tracks and by the
//! media engine of every peer connection so both sides of a session always
//! agree on what the tracks carry.

use std::time::Duration;

use webrtc::api::media_engine::MediaEngine;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};

use crate::track::TrackKind;

pub const OPUS_MIME_TYPE: &str = "audio/opus";
pub const OPUS_CLOCK_RATE: u32 = 48000;
pub const OPUS_CHANNELS: u16 = 2;
pub const OPUS_PAYLOAD_TYPE: u8 = 111;

pub const VP8_MIME_TYPE: &str = "video/VP8";
pub const VP8_CLOCK_RATE: u32 = 90000;
pub const VP8_PAYLOAD_TYPE: u8 = 96;

/// Opus frame encoding 20ms of silence
pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Smallest complete VP8 key frame (1x1), sent in place of real video
pub const VP8_PLACEHOLDER_KEYFRAME: [u8; 22] = [
    0x30, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0x01, 0x00, 0x01, 0x00, 0x0e, 0xc0, 0xfe, 0x25, 0xa4, 0x00, 0x03, 0x70,
    0x00, 0x00, 0x00, 0x00,
];

pub const AUDIO_FRAME_INTERVAL: Duration = Duration::from_millis(20);
pub const VIDEO_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Encoded frame carrying no content for `kind`
pub fn blank_frame(kind: TrackKind) -> &'static [u8] {
    match kind {
        TrackKind::Audio => &OPUS_SILENCE_FRAME,
        TrackKind::Video => &VP8_PLACEHOLDER_KEYFRAME,
    }
}

/// Pace at which blank frames of `kind` are produced
pub fn frame_interval(kind: TrackKind) -> Duration {
    match kind {
        TrackKind::Audio => AUDIO_FRAME_INTERVAL,
        TrackKind::Video => VIDEO_FRAME_INTERVAL,
    }
}

/// Codec capability a local track of `kind` is created with
pub fn capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: OPUS_MIME_TYPE.to_string(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: OPUS_CHANNELS,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: VP8_MIME_TYPE.to_string(),
            clock_rate: VP8_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

/// Register the call codecs on a media engine
pub fn register_codecs(media_engine: &mut MediaEngine) -> webrtc::error::Result<()> {
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: capability(TrackKind::Audio),
            payload_type: OPUS_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: capability(TrackKind::Video),
            payload_type: VP8_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    Ok(())
}
