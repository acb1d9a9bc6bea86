//! Configuration types for the call session core

use serde::{Deserialize, Serialize};

/// Main configuration for a call session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// STUN server URLs (may be empty for host-candidate-only setups,
    /// e.g. LAN calls and loopback tests)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum simultaneous peer links in the mesh (default: 10)
    pub max_peers: u32,

    /// Label for the per-link data channel carrying chat/reaction
    /// events (default: "events")
    pub data_channel_label: String,

    /// Local capture constraints, tiered by device class
    pub capture: CaptureConfig,

    /// Voice-activity detection tuning
    pub vad: VadConfig,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Device class the capture profile is tiered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Desktop-grade hardware and network
    Desktop,
    /// Phones/tablets: lower resolution and frame rate
    Mobile,
}

/// Local capture constraints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Device class this profile targets
    pub device_class: DeviceClass,

    /// Camera capture profile
    pub video: VideoProfile,

    /// Microphone capture profile
    pub audio: AudioProfile,
}

/// Camera capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProfile {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second
    pub frame_rate: u32,
}

/// Microphone capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProfile {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Enable acoustic echo cancellation
    pub echo_cancellation: bool,
    /// Enable noise suppression
    pub noise_suppression: bool,
    /// Enable automatic gain control
    pub auto_gain_control: bool,
}

/// Voice-activity detection tuning
///
/// The threshold is a fixed magnitude constant: there is no hysteresis
/// band and no adaptive calibration, so a level hovering around the
/// threshold will toggle the speaking state on consecutive ticks. This
/// is inherited behavior kept pending a product decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadConfig {
    /// Mean spectral magnitude above which the user counts as speaking.
    /// For a pure tone the mean magnitude approximates the tone's
    /// amplitude in the -1.0..1.0 sample range (default: 0.05)
    pub speaking_threshold: f32,

    /// Interval between analysis ticks in milliseconds (default: 100)
    pub tick_interval_ms: u64,

    /// FFT window size in samples; must be a power of two
    /// (default: 512)
    pub fft_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            max_peers: 10,
            data_channel_label: "events".to_string(),
            capture: CaptureConfig::desktop(),
            vad: VadConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::desktop()
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speaking_threshold: 0.05,
            tick_interval_ms: 100,
            fft_size: 512,
        }
    }
}

impl CaptureConfig {
    /// Capture profile for desktop-class devices: 720p camera at 30 fps
    /// with the full audio-processing chain
    pub fn desktop() -> Self {
        Self {
            device_class: DeviceClass::Desktop,
            video: VideoProfile {
                width: 1280,
                height: 720,
                frame_rate: 30,
            },
            audio: AudioProfile {
                sample_rate: 48000,
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
        }
    }

    /// Capture profile for mobile-class devices: 480p camera at 24 fps
    /// to conserve bandwidth and battery
    pub fn mobile() -> Self {
        Self {
            device_class: DeviceClass::Mobile,
            video: VideoProfile {
                width: 640,
                height: 480,
                frame_rate: 24,
            },
            audio: AudioProfile {
                sample_rate: 48000,
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_peers` is not in range 1-16
    /// - `data_channel_label` is empty
    /// - a STUN URL does not start with `stun:`
    /// - a TURN URL does not start with `turn:` or `turns:`
    /// - capture dimensions or frame rate are zero
    /// - VAD threshold, tick interval, or FFT size are out of range
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.max_peers == 0 || self.max_peers > 16 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-16, got {}",
                self.max_peers
            )));
        }

        if self.data_channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN URL must start with stun:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if self.capture.video.width == 0
            || self.capture.video.height == 0
            || self.capture.video.frame_rate == 0
        {
            return Err(Error::InvalidConfig(
                "video profile dimensions and frame rate must be non-zero".to_string(),
            ));
        }

        if self.capture.audio.sample_rate == 0 {
            return Err(Error::InvalidConfig(
                "audio sample_rate must be non-zero".to_string(),
            ));
        }

        if self.vad.speaking_threshold <= 0.0 || self.vad.speaking_threshold > 1.0 {
            return Err(Error::InvalidConfig(format!(
                "speaking_threshold must be in range (0, 1], got {}",
                self.vad.speaking_threshold
            )));
        }

        if self.vad.tick_interval_ms == 0 || self.vad.tick_interval_ms > 1000 {
            return Err(Error::InvalidConfig(format!(
                "tick_interval_ms must be in range 1-1000, got {}",
                self.vad.tick_interval_ms
            )));
        }

        if !self.vad.fft_size.is_power_of_two()
            || self.vad.fft_size < 64
            || self.vad.fft_size > 8192
        {
            return Err(Error::InvalidConfig(format!(
                "fft_size must be a power of two in range 64-8192, got {}",
                self.vad.fft_size
            )));
        }

        Ok(())
    }

    /// Create a configuration tiered for mobile-class devices
    ///
    /// Same session behavior as the default, with the 480p/24fps
    /// capture profile.
    ///
    /// # Example
    ///
    /// ```
    /// use meshcall::{DeviceClass, SessionConfig};
    ///
    /// let config = SessionConfig::mobile();
    /// assert!(config.validate().is_ok());
    /// assert_eq!(config.capture.device_class, DeviceClass::Mobile);
    /// assert_eq!(config.capture.video.height, 480);
    /// ```
    pub fn mobile() -> Self {
        Self {
            capture: CaptureConfig::mobile(),
            ..Self::default()
        }
    }

    /// Add TURN servers to this configuration
    ///
    /// Useful for chaining with preset methods.
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Replace the STUN server list
    ///
    /// An empty list keeps negotiation on host candidates only.
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Set the maximum number of peer links
    pub fn with_max_peers(mut self, max_peers: u32) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Set the data channel label
    pub fn with_data_channel_label(mut self, label: &str) -> Self {
        self.data_channel_label = label.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_max_peers_fails() {
        let mut config = SessionConfig::default();
        config.max_peers = 0;
        assert!(config.validate().is_err());

        config.max_peers = 17;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_channel_label_fails() {
        let mut config = SessionConfig::default();
        config.data_channel_label.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_stun_url_fails() {
        let mut config = SessionConfig::default();
        config.stun_servers = vec!["http://stun.example.com".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_stun_list_is_valid() {
        let config = SessionConfig::default().with_stun_servers(Vec::new());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_turn_url_fails() {
        let config = SessionConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "stun:wrong.example.com".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_vad_threshold_fails() {
        let mut config = SessionConfig::default();
        config.vad.speaking_threshold = 0.0;
        assert!(config.validate().is_err());

        config.vad.speaking_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_power_of_two_fft_fails() {
        let mut config = SessionConfig::default();
        config.vad.fft_size = 500;
        assert!(config.validate().is_err());

        config.vad.fft_size = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_video_profile_fails() {
        let mut config = SessionConfig::default();
        config.capture.video.frame_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mobile_preset() {
        let config = SessionConfig::mobile();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.device_class, DeviceClass::Mobile);
        assert_eq!(config.capture.video.width, 640);
        assert_eq!(config.capture.video.frame_rate, 24);
    }

    #[test]
    fn test_builder_chain() {
        let config = SessionConfig::mobile()
            .with_max_peers(4)
            .with_data_channel_label("chat");
        assert!(config.validate().is_ok());
        assert_eq!(config.max_peers, 4);
        assert_eq!(config.data_channel_label, "chat");
    }

    #[test]
    fn test_config_serialization() {
        let config = SessionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.max_peers, deserialized.max_peers);
        assert_eq!(config.capture.video, deserialized.capture.video);
    }
}
