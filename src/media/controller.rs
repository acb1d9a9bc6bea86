//! Local capture ownership and media operations.
//!
//! The controller is the sole owner of capture lifecycles: it opens
//! devices through the [`MediaDevices`] seam, wraps them as
//! [`LocalTrack`]s shared with peer links, and is the only component
//! that ever stops a capture. Links attach and detach references; full
//! session teardown is the only thing that releases everything.

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{CaptureConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::media::devices::{AudioCapture, MediaDevices, VideoCapture};
use crate::media::track::{LocalTrack, TrackSource};
use crate::media::vad::VoiceActivityMonitor;

/// Events emitted by the controller's broadcast channel.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// The local speaking state flipped.
    SpeakingChanged {
        /// `true` on a rising edge, `false` on a falling edge.
        speaking: bool,
    },
    /// The platform terminated the display capture (user pressed the
    /// OS-level "stop sharing" control).
    ScreenShareEnded {
        /// Camera track to reattach on every link, if one exists.
        restored: Option<Arc<LocalTrack>>,
    },
}

/// Outcome of [`MediaController::toggle_video`].
#[derive(Debug, Clone)]
pub struct VideoToggle {
    /// New enabled state of the camera track.
    pub enabled: bool,
    /// A freshly acquired track the caller must attach to every link.
    ///
    /// `None` when an existing track was flipped in place, or when a
    /// screen share currently owns the outbound video line (the camera
    /// is then picked up by the share's stop path instead).
    pub attach: Option<Arc<LocalTrack>>,
}

struct AudioSlot {
    capture: AudioCapture,
    track: Arc<LocalTrack>,
}

struct VideoSlot {
    capture: VideoCapture,
    track: Arc<LocalTrack>,
}

/// Current local capture tracks and their flags.
#[derive(Default)]
struct LocalMediaState {
    audio: Option<AudioSlot>,
    camera: Option<VideoSlot>,
    display: Option<VideoSlot>,
}

/// Owner of local capture tracks and the voice activity monitor.
pub struct MediaController {
    devices: Arc<dyn MediaDevices>,
    capture: CaptureConfig,
    state: RwLock<LocalMediaState>,
    monitor: VoiceActivityMonitor,
    events: broadcast::Sender<MediaEvent>,
    share_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl MediaController {
    /// Create a controller over the given capture backend.
    pub fn new(devices: Arc<dyn MediaDevices>, config: &SessionConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            devices,
            capture: config.capture.clone(),
            state: RwLock::new(LocalMediaState::default()),
            monitor: VoiceActivityMonitor::new(&config.vad, events.clone()),
            events,
            share_watcher: Mutex::new(None),
        }
    }

    /// Subscribe to media events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    /// Request local capture matching the configured profiles.
    ///
    /// All-or-nothing: if the camera fails after the microphone opened,
    /// the microphone is stopped again and the error surfaces untouched
    /// ([`Error::PermissionDenied`] or [`Error::DeviceUnavailable`] from
    /// the backend). On success the returned tracks are stored, and the
    /// voice activity monitor runs against the new microphone.
    pub async fn acquire(&self, audio: bool, video: bool) -> Result<Vec<Arc<LocalTrack>>> {
        let mic = if audio {
            Some(
                self.devices
                    .open_microphone(None, &self.capture.audio)
                    .await?,
            )
        } else {
            None
        };

        let camera = if video {
            match self.devices.open_camera(None, &self.capture.video).await {
                Ok(capture) => Some(capture),
                Err(e) => {
                    if let Some(mic) = &mic {
                        mic.stop();
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        let mut tracks = Vec::new();
        let mut monitor_tap = None;

        {
            let mut state = self.state.write().await;
            if let Some(capture) = mic {
                monitor_tap = Some((capture.samples.clone(), Arc::clone(&capture.enabled)));
                let track = Arc::new(LocalTrack::new(
                    TrackSource::Microphone,
                    Arc::clone(&capture.track),
                    Arc::clone(&capture.enabled),
                ));
                if let Some(old) = state.audio.replace(AudioSlot {
                    capture,
                    track: Arc::clone(&track),
                }) {
                    old.capture.stop();
                }
                tracks.push(track);
            }
            if let Some(capture) = camera {
                let track = Arc::new(LocalTrack::new(
                    TrackSource::Camera,
                    Arc::clone(&capture.track),
                    Arc::clone(&capture.enabled),
                ));
                if let Some(old) = state.camera.replace(VideoSlot {
                    capture,
                    track: Arc::clone(&track),
                }) {
                    old.capture.stop();
                }
                tracks.push(track);
            }
        }

        if let Some((samples, enabled)) = monitor_tap {
            self.monitor.start(samples, enabled).await;
        }

        info!(audio, video, "local media acquired");
        Ok(tracks)
    }

    /// Flip the microphone's enabled flag.
    ///
    /// The capture keeps running; a disabled track carries silence, and
    /// the monitor observes the flag, so muting forces the speaking state
    /// to false. Returns the new enabled state.
    pub async fn toggle_audio(&self) -> Result<bool> {
        let state = self.state.read().await;
        let slot = state
            .audio
            .as_ref()
            .ok_or_else(|| Error::DeviceUnavailable("no audio track to toggle".to_string()))?;
        let enabled = !slot.track.is_enabled();
        slot.track.set_enabled(enabled);
        debug!(enabled, "audio toggled");
        Ok(enabled)
    }

    /// Flip the camera's enabled flag, acquiring a camera first if none
    /// exists yet.
    ///
    /// A flip in place needs no link changes. A fresh acquisition is
    /// reported through [`VideoToggle::attach`] so the caller can attach
    /// it to every link, which introduces a new media line and therefore
    /// a renegotiation.
    pub async fn toggle_video(&self) -> Result<VideoToggle> {
        {
            let state = self.state.read().await;
            if let Some(slot) = &state.camera {
                let enabled = !slot.track.is_enabled();
                slot.track.set_enabled(enabled);
                debug!(enabled, "video toggled");
                return Ok(VideoToggle {
                    enabled,
                    attach: None,
                });
            }
        }

        let capture = self.devices.open_camera(None, &self.capture.video).await?;
        let track = Arc::new(LocalTrack::new(
            TrackSource::Camera,
            Arc::clone(&capture.track),
            Arc::clone(&capture.enabled),
        ));

        let mut state = self.state.write().await;
        if let Some(slot) = &state.camera {
            // A concurrent acquisition won; flip that one instead.
            capture.stop();
            let enabled = !slot.track.is_enabled();
            slot.track.set_enabled(enabled);
            return Ok(VideoToggle {
                enabled,
                attach: None,
            });
        }
        let sharing = state.display.is_some();
        state.camera = Some(VideoSlot {
            capture,
            track: Arc::clone(&track),
        });
        drop(state);

        info!(sharing, "camera acquired by video toggle");
        let attach = if sharing { None } else { Some(track) };
        Ok(VideoToggle {
            enabled: true,
            attach,
        })
    }

    /// Acquire a display capture and make it the active outbound video.
    ///
    /// Returns the display track for the caller to push onto every
    /// link's video sender. The camera track, if any, stays alive for
    /// restoration when the share ends. Calling this while a share is
    /// already active returns the existing display track.
    pub async fn start_screen_share(self: &Arc<Self>) -> Result<Arc<LocalTrack>> {
        {
            let state = self.state.read().await;
            if let Some(slot) = &state.display {
                return Ok(Arc::clone(&slot.track));
            }
        }

        let capture = self.devices.open_display(&self.capture.video).await?;
        let ended = capture.ended.clone();
        let track = Arc::new(LocalTrack::new(
            TrackSource::Display,
            Arc::clone(&capture.track),
            Arc::clone(&capture.enabled),
        ));

        {
            let mut state = self.state.write().await;
            if let Some(slot) = &state.display {
                // A concurrent share won; keep it.
                capture.stop();
                return Ok(Arc::clone(&slot.track));
            }
            state.display = Some(VideoSlot {
                capture,
                track: Arc::clone(&track),
            });
        }

        self.spawn_share_watcher(ended).await;
        info!("screen share started");
        Ok(track)
    }

    /// Stop an active screen share.
    ///
    /// Returns the camera track to restore on every link, or `None` when
    /// no camera exists and the caller should clear outbound video
    /// instead. Fails with [`Error::DeviceUnavailable`] when no share is
    /// active, so callers cannot mistake "nothing to stop" for "stopped,
    /// nothing to restore".
    pub async fn stop_screen_share(&self) -> Result<Option<Arc<LocalTrack>>> {
        // Cancel the watcher first so the platform-ended path cannot race
        // this one into a second stop.
        if let Some(task) = self.share_watcher.lock().await.take() {
            task.abort();
        }

        let restored = {
            let mut state = self.state.write().await;
            let slot = state
                .display
                .take()
                .ok_or_else(|| Error::DeviceUnavailable("no screen share active".to_string()))?;
            slot.capture.stop();
            state.camera.as_ref().map(|c| Arc::clone(&c.track))
        };

        info!(restoring_camera = restored.is_some(), "screen share stopped");
        Ok(restored)
    }

    /// Whether a display capture currently owns the outbound video line.
    pub async fn is_screen_sharing(&self) -> bool {
        self.state.read().await.display.is_some()
    }

    /// Acquire the named microphone and swap it into local state.
    ///
    /// The previous capture is stopped, the mute state carries over, and
    /// the voice activity monitor restarts against the new tap. Returns
    /// the new track for sender replacement on every link.
    pub async fn switch_microphone(&self, device_id: &str) -> Result<Arc<LocalTrack>> {
        let capture = self
            .devices
            .open_microphone(Some(device_id), &self.capture.audio)
            .await?;
        let samples = capture.samples.clone();
        let enabled = Arc::clone(&capture.enabled);
        let track = Arc::new(LocalTrack::new(
            TrackSource::Microphone,
            Arc::clone(&capture.track),
            Arc::clone(&capture.enabled),
        ));

        {
            let mut state = self.state.write().await;
            let was_enabled = state
                .audio
                .as_ref()
                .map(|slot| slot.track.is_enabled())
                .unwrap_or(true);
            track.set_enabled(was_enabled);
            if let Some(old) = state.audio.replace(AudioSlot {
                capture,
                track: Arc::clone(&track),
            }) {
                old.capture.stop();
            }
        }

        self.monitor.start(samples, enabled).await;
        info!(device_id, "microphone switched");
        Ok(track)
    }

    /// Acquire the named camera and swap it into local state.
    ///
    /// Returns the new track for sender replacement. While a screen share
    /// is active the caller should skip the replacement; the stored
    /// camera is picked up by the share's stop path.
    pub async fn switch_camera(&self, device_id: &str) -> Result<Arc<LocalTrack>> {
        let capture = self
            .devices
            .open_camera(Some(device_id), &self.capture.video)
            .await?;
        let track = Arc::new(LocalTrack::new(
            TrackSource::Camera,
            Arc::clone(&capture.track),
            Arc::clone(&capture.enabled),
        ));

        {
            let mut state = self.state.write().await;
            let was_enabled = state
                .camera
                .as_ref()
                .map(|slot| slot.track.is_enabled())
                .unwrap_or(true);
            track.set_enabled(was_enabled);
            if let Some(old) = state.camera.replace(VideoSlot {
                capture,
                track: Arc::clone(&track),
            }) {
                old.capture.stop();
            }
        }

        info!(device_id, "camera switched");
        Ok(track)
    }

    /// The currently active local tracks, outbound-video rules applied:
    /// the display track stands in for the camera while a share runs.
    pub async fn local_tracks(&self) -> Vec<Arc<LocalTrack>> {
        let state = self.state.read().await;
        let mut tracks = Vec::new();
        if let Some(slot) = &state.audio {
            tracks.push(Arc::clone(&slot.track));
        }
        match (&state.display, &state.camera) {
            (Some(display), _) => tracks.push(Arc::clone(&display.track)),
            (None, Some(camera)) => tracks.push(Arc::clone(&camera.track)),
            (None, None) => {}
        }
        tracks
    }

    /// Last observed local speaking state.
    pub fn is_speaking(&self) -> bool {
        self.monitor.is_speaking()
    }

    /// Stop the monitor and every capture. Idempotent.
    pub async fn cleanup(&self) {
        self.monitor.stop().await;
        if let Some(task) = self.share_watcher.lock().await.take() {
            task.abort();
        }

        let mut state = self.state.write().await;
        if let Some(slot) = state.audio.take() {
            slot.capture.stop();
        }
        if let Some(slot) = state.camera.take() {
            slot.capture.stop();
        }
        if let Some(slot) = state.display.take() {
            slot.capture.stop();
        }
        drop(state);

        debug!("local media released");
    }

    async fn spawn_share_watcher(self: &Arc<Self>, mut ended: watch::Receiver<bool>) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                if ended.changed().await.is_err() {
                    // Capture stopped by us; nothing to react to.
                    return;
                }
                if *ended.borrow() {
                    break;
                }
            }
            if let Some(controller) = weak.upgrade() {
                controller.handle_share_ended().await;
            }
        });

        let mut slot = self.share_watcher.lock().await;
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
    }

    async fn handle_share_ended(&self) {
        let restored = {
            let mut state = self.state.write().await;
            match state.display.take() {
                Some(slot) => {
                    slot.capture.stop();
                    state.camera.as_ref().map(|c| Arc::clone(&c.track))
                }
                // The manual stop path won the race.
                None => return,
            }
        };
        self.share_watcher.lock().await.take();

        info!(
            restoring_camera = restored.is_some(),
            "screen share ended by platform"
        );
        let _ = self.events.send(MediaEvent::ScreenShareEnded { restored });
    }
}
