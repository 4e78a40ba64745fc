//! Capture-device abstraction.
//!
//! The core never talks to microphones or cameras directly: a
//! [`MediaDevices`] backend acquires capture and hands back local
//! tracks, and platform shells feed samples into those tracks (the
//! same split as the desktop crate's cpal backend). Headless
//! embedders and the test-suite use [`NullMediaDevices`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::errors::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// What a call attempt wants captured. Audio is always requested;
/// video only for video calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

/// One local capture track, ready to attach to a peer connection.
pub struct LocalTrack {
    kind: TrackKind,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, rtc: Arc<TrackLocalStaticSample>) -> Self {
        Self { kind, rtc }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// The underlying track. Capture backends write encoded samples
    /// into it; the signaling flow attaches it to the peer connection.
    pub fn rtc(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }
}

/// The local capture for one call attempt. Transient and
/// process-local; owned by the signaling flow, never persisted.
pub struct LocalMediaStream {
    tracks: Vec<LocalTrack>,
    stopped: Arc<AtomicBool>,
}

impl LocalMediaStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            tracks,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }

    /// Stop all capture. Backends poll [`Self::stop_flag`] and cease
    /// feeding once set. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Shared flag handed to capture backends.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }
}

/// Capture-device acquisition.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire local capture. Fails with [`MediaError`] when the
    /// device is denied or unavailable; the caller aborts the attempt.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError>;
}

/// A recorded voice clip ready to send as an audio message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Voice-message recording: start, then either cancel or finish into
/// an [`AudioClip`].
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    async fn start(&self) -> Result<(), MediaError>;
    async fn cancel(&self);
    async fn finish(&self) -> Result<AudioClip, MediaError>;
}

pub(crate) fn opus_track(id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "huddle".to_owned(),
    ))
}

pub(crate) fn vp8_track(id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            ..Default::default()
        },
        id.to_owned(),
        "huddle".to_owned(),
    ))
}

/// Device backend that grants or denies without touching hardware.
/// Grants produce silent tracks nobody feeds — enough for signaling.
pub struct NullMediaDevices {
    deny: bool,
}

impl NullMediaDevices {
    pub fn granting() -> Self {
        Self { deny: false }
    }

    pub fn denying() -> Self {
        Self { deny: true }
    }
}

#[async_trait]
impl MediaDevices for NullMediaDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError> {
        if self.deny {
            return Err(MediaError::PermissionDenied);
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, opus_track("microphone")));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(TrackKind::Video, vp8_track("camera")));
        }
        Ok(LocalMediaStream::new(tracks))
    }
}
