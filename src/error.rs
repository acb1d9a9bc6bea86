//! Error types for the call session core

/// Result type alias using the session core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session core operations
///
/// Every failure is scoped to a single peer link or a single media
/// operation; none of these is fatal to the session as a whole.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture was rejected by the platform permission prompt
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture device, or the device refused to open
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Offer/answer exchange was rejected by the transport
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The platform lacks the capability probe or media support
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// Transport-level failure (connection build, send paths, peer cap)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Check if this error came from local media acquisition
    pub fn is_media_error(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_) | Error::DeviceUnavailable(_)
        )
    }

    /// Check if this error came from the offer/answer exchange
    pub fn is_negotiation_error(&self) -> bool {
        matches!(self, Error::NegotiationFailed(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
