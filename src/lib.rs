//! Session and negotiation core for multi-party WebRTC calls
//!
//! This crate owns the call-session state machine for a mesh of peers:
//! offer/answer negotiation, ICE candidate handling, local capture
//! lifecycles, and voice-activity detection. Signaling transport and
//! actual device capture stay outside, behind the [`SignalingRelay`]
//! and [`MediaDevices`] traits the embedder implements.
//!
//! # Features
//!
//! - **Mesh sessions**: lazy per-peer links, up to a configured cap
//! - **Negotiation glue**: offer/answer with deferred renegotiation and
//!   ICE candidates buffered until the remote description lands
//! - **Capture ownership**: microphone, camera, and screen share with
//!   mute/unmute as track flag flips (no renegotiation)
//! - **Voice activity detection**: FFT magnitude over a PCM tap, edge
//!   events only
//! - **Data channels**: one ordered channel per link carrying chat and
//!   reaction events
//! - **Subscribe-style events**: a single `tokio::sync::broadcast`
//!   stream of [`SessionEvent`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Embedder (UI, platform glue)                        │
//! │  ↓ SignalingRelay + MediaDevices traits              │
//! │  SessionManager (peer map, event pumps)              │
//! │  ├─ PeerLink × N (offer/answer, ICE, senders)        │
//! │  │   └─ ordered data channel (chat/reactions)        │
//! │  └─ MediaController (capture lifecycles)             │
//! │      └─ VoiceActivityMonitor (spectrum over PCM)     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use meshcall::SessionConfig;
//!
//! // Configure a session
//! let config = SessionConfig::default()
//!     .with_stun_servers(vec!["stun:stun.l.google.com:19302".to_string()])
//!     .with_max_peers(8);
//!
//! // Validate configuration
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_peers, 8);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use meshcall::{MediaController, SessionConfig, SessionManager};
//!
//! # fn platform_relay() -> Arc<dyn meshcall::SignalingRelay> { unimplemented!() }
//! # fn platform_devices() -> Arc<dyn meshcall::MediaDevices> { unimplemented!() }
//! # async fn example() -> meshcall::Result<()> {
//! let config = SessionConfig::default();
//! let media = Arc::new(MediaController::new(platform_devices(), &config));
//! let session = SessionManager::join("user-a", platform_relay(), media, config).await?;
//!
//! // Acquire local capture; tracks fan out to every link
//! session.acquire_media(true, true).await?;
//!
//! // Watch remote tracks, state changes, and speaking edges
//! let mut events = session.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

// Re-exports for public API
pub use channels::{ChannelEvent, MAX_EVENT_SIZE};
pub use config::{
    AudioProfile, CaptureConfig, DeviceClass, SessionConfig, TurnServerConfig, VadConfig,
    VideoProfile,
};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use media::{
    AudioCapture, DeviceInfo, LocalTrack, MediaController, MediaDevices, MediaEvent, MediaKind,
    TrackSource, VideoCapture, VideoToggle, VoiceActivityMonitor,
};
pub use peer::{CloseReason, LinkState, PeerLink, TrackChange};
pub use session::SessionManager;
pub use signaling::{SignalingMessage, SignalingRelay};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
