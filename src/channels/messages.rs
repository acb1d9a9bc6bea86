//! Application events carried over the peer data channel.
//!
//! Every [`PeerLink`](crate::peer::PeerLink) opens one ordered data channel
//! next to its media lines. The events on it are small JSON payloads; media
//! never travels here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum encoded size of a single channel event (16 KB).
///
/// Keeps every event comfortably below common SCTP message limits so a
/// payload is never silently truncated or split by the transport.
pub const MAX_EVENT_SIZE: usize = 16 * 1024;

/// An application event exchanged over the data channel.
///
/// The wire format is JSON with a `kind` tag, so a browser peer can produce
/// and consume the same payloads with `JSON.parse`/`JSON.stringify`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A chat message typed by the remote participant.
    Chat {
        /// Message text, UTF-8.
        body: String,
    },

    /// A transient emoji reaction.
    Reaction {
        /// The emoji itself, e.g. `"👍"`.
        emoji: String,
    },
}

impl ChannelEvent {
    /// Create a chat event.
    pub fn chat(body: impl Into<String>) -> Self {
        ChannelEvent::Chat { body: body.into() }
    }

    /// Create a reaction event.
    pub fn reaction(emoji: impl Into<String>) -> Self {
        ChannelEvent::Reaction {
            emoji: emoji.into(),
        }
    }

    /// Check if this is a chat event.
    pub fn is_chat(&self) -> bool {
        matches!(self, ChannelEvent::Chat { .. })
    }

    /// Check if this is a reaction event.
    pub fn is_reaction(&self) -> bool {
        matches!(self, ChannelEvent::Reaction { .. })
    }

    /// Encode for transmission.
    ///
    /// Fails with [`Error::TransportError`] if the encoded event exceeds
    /// [`MAX_EVENT_SIZE`], so oversized chat bodies are rejected at the
    /// sender instead of being dropped by the receiver.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| Error::TransportError(format!("failed to encode channel event: {e}")))?;
        if bytes.len() > MAX_EVENT_SIZE {
            return Err(Error::TransportError(format!(
                "channel event is {} bytes, limit is {MAX_EVENT_SIZE}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Decode a received payload.
    ///
    /// Oversized or malformed payloads fail with [`Error::TransportError`];
    /// the link logs and drops them rather than tearing the channel down.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_EVENT_SIZE {
            return Err(Error::TransportError(format!(
                "received channel event is {} bytes, limit is {MAX_EVENT_SIZE}",
                bytes.len()
            )));
        }
        serde_json::from_slice(bytes)
            .map_err(|e| Error::TransportError(format!("failed to decode channel event: {e}")))
    }
}
