//! Local track handles shared between the controller and peer links.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Media kind carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio (microphone).
    Audio,
    /// Video (camera or display).
    Video,
}

impl MediaKind {
    /// Lowercase name for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a local track's media comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    /// Microphone capture.
    Microphone,
    /// Camera capture.
    Camera,
    /// Display (screen-share) capture.
    Display,
}

impl TrackSource {
    /// The media kind a source produces.
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackSource::Microphone => MediaKind::Audio,
            TrackSource::Camera | TrackSource::Display => MediaKind::Video,
        }
    }
}

/// A local capture track owned by the [`MediaController`].
///
/// Peer links hold `Arc` references and attach the underlying RTP track
/// to their senders; they never stop the capture behind it. The enabled
/// flag is shared with the capture pipeline, so flipping it mutes or
/// unmutes every link at once without touching any sender.
///
/// [`MediaController`]: crate::media::MediaController
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    source: TrackSource,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub(crate) fn new(
        source: TrackSource,
        rtc: Arc<TrackLocalStaticSample>,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: source.kind(),
            source,
            rtc,
            enabled,
        }
    }

    /// Unique id of this track.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Audio or video.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Capture source behind the track.
    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Whether the track is currently live (unmuted).
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The RTP track to hand to a peer connection sender.
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
