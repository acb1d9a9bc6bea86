//! In-memory support for session integration tests
//!
//! Provides infrastructure for exercising full sessions without a
//! network or real capture hardware:
//! - `SignalingHub`: in-memory relay routing messages between
//!   registered participants (addressed delivery plus presence fan-out)
//! - `FakeDevices`: a scriptable `MediaDevices` backend producing
//!   silent tracks, with knobs for permission denial, PCM injection,
//!   and platform-ended screen shares
//! - `Participant`: one joined `SessionManager` wired to both
//! - Synthetic audio generators and event-wait helpers
//!
//! Basic usage pattern:
//!
//! 1. Create a `SignalingHub`
//! 2. Create participants with `participant(&hub, "user-a", config)`
//! 3. Drive media and signaling through the sessions
//! 4. Wait on events with `wait_for` / `wait_for_link_state`
//! 5. Call `session.leave()` to clean up

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use meshcall::{
    AudioCapture, AudioProfile, DeviceInfo, Error, LinkState, MediaController, MediaDevices,
    MediaKind, Result, SessionConfig, SessionEvent, SessionManager, SignalingMessage,
    SignalingRelay, VideoCapture, VideoProfile,
};

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,meshcall=debug")
        .try_init();
}

/// Host-candidate-only configuration for single-process sessions
pub fn offline_config() -> SessionConfig {
    SessionConfig::default().with_stun_servers(Vec::new())
}

/// Generate a sine wave audio signal
pub fn sine_wave(frequency: f32, amplitude: f32, count: usize, sample_rate: u32) -> Vec<f32> {
    (0..count)
        .map(|n| {
            let t = n as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
pub fn silence(count: usize) -> Vec<f32> {
    vec![0.0; count]
}

// ============================================================================
// Signaling hub
// ============================================================================

/// In-memory signaling fan-out between registered participants.
///
/// Addressed messages go to the named inbox; presence messages go to
/// every inbox except the sender's, mirroring a relay-server fan-out.
pub struct SignalingHub {
    inboxes: RwLock<HashMap<String, mpsc::UnboundedSender<SignalingMessage>>>,
}

impl SignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inboxes: RwLock::new(HashMap::new()),
        })
    }

    /// Register a participant: returns its relay handle and the inbox
    /// to hand to `SessionManager::attach_inbound`.
    pub async fn register(
        self: &Arc<Self>,
        peer_id: &str,
    ) -> (Arc<HubRelay>, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.write().await.insert(peer_id.to_string(), tx);
        let relay = Arc::new(HubRelay {
            hub: Arc::clone(self),
            local: peer_id.to_string(),
        });
        (relay, rx)
    }
}

/// One participant's sending handle into the hub.
pub struct HubRelay {
    hub: Arc<SignalingHub>,
    local: String,
}

#[async_trait]
impl SignalingRelay for HubRelay {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        let inboxes = self.hub.inboxes.read().await;
        match message.to() {
            Some(to) => {
                if let Some(inbox) = inboxes.get(to) {
                    let _ = inbox.send(message);
                }
            }
            None => {
                for (peer, inbox) in inboxes.iter() {
                    if peer != &self.local {
                        let _ = inbox.send(message.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Fake capture backend
// ============================================================================

/// Scriptable `MediaDevices` backend.
///
/// Produces silent tracks by default. Audio fed with `feed_audio` lands
/// in the most recently opened microphone's PCM tap; `end_display`
/// flips the most recent display capture's ended watch, as the platform
/// "stop sharing" control would.
pub struct FakeDevices {
    deny_all: AtomicBool,
    deny_video: AtomicBool,
    next_track: AtomicUsize,
    audio_feed: Mutex<Option<watch::Sender<Arc<Vec<f32>>>>>,
    display_ended: Mutex<Option<watch::Sender<bool>>>,
    camera_ended: Mutex<Vec<watch::Sender<bool>>>,
    opened: Mutex<Vec<String>>,
    stopped: Arc<Mutex<Vec<String>>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deny_all: AtomicBool::new(false),
            deny_video: AtomicBool::new(false),
            next_track: AtomicUsize::new(0),
            audio_feed: Mutex::new(None),
            display_ended: Mutex::new(None),
            camera_ended: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            stopped: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Deny every open call with `PermissionDenied`.
    pub fn deny_all(&self, deny: bool) {
        self.deny_all.store(deny, Ordering::SeqCst);
    }

    /// Deny camera and display opens only; microphones keep working.
    pub fn deny_video(&self, deny: bool) {
        self.deny_video.store(deny, Ordering::SeqCst);
    }

    /// Push PCM samples into the current microphone's tap.
    pub async fn feed_audio(&self, samples: Vec<f32>) {
        if let Some(feed) = self.audio_feed.lock().await.as_ref() {
            let _ = feed.send(Arc::new(samples));
        }
    }

    /// Simulate the platform terminating the screen share.
    pub async fn end_display(&self) {
        if let Some(ended) = self.display_ended.lock().await.as_ref() {
            let _ = ended.send(true);
        }
    }

    /// Labels of every capture opened so far, in order.
    pub async fn opened(&self) -> Vec<String> {
        self.opened.lock().await.clone()
    }

    /// Labels of every capture stopped so far, in order.
    pub async fn stopped(&self) -> Vec<String> {
        self.stopped.lock().await.clone()
    }

    fn track_id(&self, prefix: &str) -> String {
        let n = self.next_track.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }

    fn watch_stop(&self, label: String, mut stop: mpsc::Receiver<()>) {
        let stopped = Arc::clone(&self.stopped);
        tokio::spawn(async move {
            if stop.recv().await.is_some() {
                stopped.lock().await.push(label);
            }
        });
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![
            DeviceInfo {
                id: "default-mic".to_string(),
                label: "Fake Microphone".to_string(),
                kind: MediaKind::Audio,
            },
            DeviceInfo {
                id: "usb-mic".to_string(),
                label: "Fake USB Microphone".to_string(),
                kind: MediaKind::Audio,
            },
            DeviceInfo {
                id: "default-cam".to_string(),
                label: "Fake Camera".to_string(),
                kind: MediaKind::Video,
            },
            DeviceInfo {
                id: "rear-cam".to_string(),
                label: "Fake Rear Camera".to_string(),
                kind: MediaKind::Video,
            },
        ])
    }

    async fn open_microphone(
        &self,
        device_id: Option<&str>,
        profile: &AudioProfile,
    ) -> Result<AudioCapture> {
        if self.deny_all.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied(
                "microphone access denied".to_string(),
            ));
        }
        let label = format!("mic:{}", device_id.unwrap_or("default-mic"));
        self.opened.lock().await.push(label.clone());

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                ..Default::default()
            },
            self.track_id("fake-audio"),
            "fake-capture".to_string(),
        ));
        // 10 ms of silence until the test feeds real samples.
        let (feed, samples) = watch::channel(Arc::new(silence(profile.sample_rate as usize / 100)));
        *self.audio_feed.lock().await = Some(feed);

        let (stop_tx, stop_rx) = mpsc::channel(1);
        self.watch_stop(label, stop_rx);

        Ok(AudioCapture {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
            samples,
            stop: stop_tx,
        })
    }

    async fn open_camera(
        &self,
        device_id: Option<&str>,
        _profile: &VideoProfile,
    ) -> Result<VideoCapture> {
        if self.deny_all.load(Ordering::SeqCst) || self.deny_video.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("camera access denied".to_string()));
        }
        let label = format!("cam:{}", device_id.unwrap_or("default-cam"));
        self.opened.lock().await.push(label.clone());

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                ..Default::default()
            },
            self.track_id("fake-video"),
            "fake-capture".to_string(),
        ));
        let (ended_tx, ended) = watch::channel(false);
        self.camera_ended.lock().await.push(ended_tx);

        let (stop_tx, stop_rx) = mpsc::channel(1);
        self.watch_stop(label, stop_rx);

        Ok(VideoCapture {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
            ended,
            stop: stop_tx,
        })
    }

    async fn open_display(&self, _profile: &VideoProfile) -> Result<VideoCapture> {
        if self.deny_all.load(Ordering::SeqCst) || self.deny_video.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied(
                "display capture denied".to_string(),
            ));
        }
        self.opened.lock().await.push("display".to_string());

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                ..Default::default()
            },
            self.track_id("fake-display"),
            "fake-capture".to_string(),
        ));
        let (ended_tx, ended) = watch::channel(false);
        *self.display_ended.lock().await = Some(ended_tx);

        let (stop_tx, stop_rx) = mpsc::channel(1);
        self.watch_stop("display".to_string(), stop_rx);

        Ok(VideoCapture {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
            ended,
            stop: stop_tx,
        })
    }
}

// ============================================================================
// Participants
// ============================================================================

/// One joined session with its backing fakes.
pub struct Participant {
    pub session: Arc<SessionManager>,
    pub devices: Arc<FakeDevices>,
    pub events: broadcast::Receiver<SessionEvent>,
}

/// Join a participant to the hub with a fresh fake capture backend.
pub async fn participant(
    hub: &Arc<SignalingHub>,
    peer_id: &str,
    config: SessionConfig,
) -> Participant {
    let devices = FakeDevices::new();
    let media = Arc::new(MediaController::new(
        devices.clone() as Arc<dyn MediaDevices>,
        &config,
    ));
    let (relay, inbox) = hub.register(peer_id).await;
    let session = SessionManager::join(peer_id, relay, media, config)
        .await
        .unwrap_or_else(|e| panic!("join failed for {peer_id}: {e}"));
    // Subscribe before the pump starts so no early event is missed.
    let events = session.subscribe();
    session.attach_inbound(inbox).await;
    Participant {
        session,
        devices,
        events,
    }
}

// ============================================================================
// Event helpers
// ============================================================================

/// Wait until an event matching the predicate arrives, returning it, or
/// `None` on timeout or stream end.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    timeout: Duration,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> Option<SessionEvent> {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if predicate(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .unwrap_or(None)
}

/// Wait for a specific link state on a specific peer.
pub async fn wait_for_link_state(
    events: &mut broadcast::Receiver<SessionEvent>,
    peer: &str,
    want: LinkState,
    timeout: Duration,
) -> bool {
    wait_for(events, timeout, |event| {
        matches!(
            event,
            SessionEvent::ConnectionStateChanged { peer_id, state }
                if peer_id == peer && *state == want
        )
    })
    .await
    .is_some()
}
