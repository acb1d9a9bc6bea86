//! Local media: capture devices, track handles, voice activity
//! detection, and the controller that owns them.

pub mod controller;
pub mod devices;
pub mod track;
pub mod vad;

pub use controller::{MediaController, MediaEvent, VideoToggle};
pub use devices::{AudioCapture, DeviceInfo, MediaDevices, VideoCapture};
pub use track::{LocalTrack, MediaKind, TrackSource};
pub use vad::VoiceActivityMonitor;
