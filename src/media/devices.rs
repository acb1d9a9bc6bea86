//! Capture device seam.
//!
//! The session core never talks to capture hardware directly. Embedders
//! implement [`MediaDevices`] over whatever platform capture they have
//! (CoreAudio, V4L2, a browser shim); tests implement it with scripted
//! fakes. The trait hands back capture bundles that pair an RTP-ready
//! track with the control handles the [`MediaController`] needs: an
//! enabled flag, a PCM tap or an ended watch, and a stop signal.
//!
//! [`MediaController`]: crate::media::MediaController

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::config::{AudioProfile, VideoProfile};
use crate::error::Result;
use crate::media::track::MediaKind;

/// A capture device reported by [`MediaDevices::enumerate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable platform identifier, usable with the `open_*` calls.
    pub id: String,
    /// Human-readable name for device pickers.
    pub label: String,
    /// Whether the device produces audio or video.
    pub kind: MediaKind,
}

/// A running microphone capture.
///
/// The producer behind it feeds `track` with encoded samples and keeps
/// `samples` refreshed with the most recent raw PCM window for analysis.
/// Producers observe `enabled`: while it is `false` the track carries
/// silence. Sending on `stop` (or dropping the bundle) ends the capture.
pub struct AudioCapture {
    /// Local track to attach to peer connections.
    pub track: Arc<TrackLocalStaticSample>,
    /// Mute flag shared with the producer.
    pub enabled: Arc<AtomicBool>,
    /// Latest analysis window of raw PCM samples in `[-1.0, 1.0]`.
    pub samples: watch::Receiver<Arc<Vec<f32>>>,
    /// Stop signal for the capture pipeline.
    pub stop: mpsc::Sender<()>,
}

impl AudioCapture {
    /// Signal the capture pipeline to stop.
    ///
    /// Best-effort: a pipeline that already exited has no receiver left,
    /// which is fine.
    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }
}

impl fmt::Debug for AudioCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioCapture")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A running camera or display capture.
///
/// `ended` flips to `true` when the source terminates on its own, which
/// for display capture is the platform's "stop sharing" control.
pub struct VideoCapture {
    /// Local track to attach to peer connections.
    pub track: Arc<TrackLocalStaticSample>,
    /// Enable flag shared with the producer.
    pub enabled: Arc<AtomicBool>,
    /// Flips to `true` when the source ends outside our control.
    pub ended: watch::Receiver<bool>,
    /// Stop signal for the capture pipeline.
    pub stop: mpsc::Sender<()>,
}

impl VideoCapture {
    /// Signal the capture pipeline to stop.
    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }
}

impl fmt::Debug for VideoCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoCapture")
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .field("ended", &*self.ended.borrow())
            .finish_non_exhaustive()
    }
}

/// Platform capture backend.
///
/// Implementations map platform rejections to the crate's error taxonomy:
/// [`Error::PermissionDenied`] when the user or OS refuses access,
/// [`Error::DeviceUnavailable`] when no matching device exists, and
/// [`Error::UnsupportedEnvironment`] when the platform has no capture
/// support at all.
///
/// [`Error::PermissionDenied`]: crate::error::Error::PermissionDenied
/// [`Error::DeviceUnavailable`]: crate::error::Error::DeviceUnavailable
/// [`Error::UnsupportedEnvironment`]: crate::error::Error::UnsupportedEnvironment
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List the capture devices currently present.
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Open a microphone.
    ///
    /// # Arguments
    ///
    /// * `device_id` - A specific device from [`enumerate`](Self::enumerate),
    ///   or `None` for the platform default.
    /// * `profile` - Sample rate and audio-processing constraints.
    async fn open_microphone(
        &self,
        device_id: Option<&str>,
        profile: &AudioProfile,
    ) -> Result<AudioCapture>;

    /// Open a camera.
    ///
    /// # Arguments
    ///
    /// * `device_id` - A specific device, or `None` for the platform default.
    /// * `profile` - Resolution and frame-rate constraints.
    async fn open_camera(
        &self,
        device_id: Option<&str>,
        profile: &VideoProfile,
    ) -> Result<VideoCapture>;

    /// Open a display (screen) capture.
    ///
    /// Display capture has no device id; the platform prompts the user
    /// for the surface to share.
    async fn open_display(&self, profile: &VideoProfile) -> Result<VideoCapture>;
}
