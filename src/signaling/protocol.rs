//! Signaling message types exchanged over the external relay

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Signaling message routed between participants by the relay
///
/// Wire format is a tagged JSON object:
/// `{ "type": "offer", "from": "...", "to": "...", "payload": { ... } }`.
/// Offer/answer payloads are browser-shaped session descriptions
/// (`{ "type": "offer"|"answer", "sdp": "..." }`); candidate payloads
/// are browser-shaped `RTCIceCandidateInit` objects. `join` and `leave`
/// are presence notifications fanned out by the relay; they carry no
/// recipient and no payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Session-description proposal starting or renegotiating a link
    Offer {
        /// Sender participant ID
        from: String,
        /// Recipient participant ID
        to: String,
        /// SDP offer
        payload: RTCSessionDescription,
    },

    /// Reply to an offer
    Answer {
        /// Sender participant ID
        from: String,
        /// Recipient participant ID
        to: String,
        /// SDP answer
        payload: RTCSessionDescription,
    },

    /// Proposed network path for connectivity negotiation
    IceCandidate {
        /// Sender participant ID
        from: String,
        /// Recipient participant ID
        to: String,
        /// Candidate descriptor
        payload: RTCIceCandidateInit,
    },

    /// A participant entered the session
    Join {
        /// Participant that joined
        from: String,
    },

    /// A participant left the session
    Leave {
        /// Participant that left
        from: String,
    },
}

impl SignalingMessage {
    /// Build an offer message
    pub fn offer(from: &str, to: &str, payload: RTCSessionDescription) -> Self {
        Self::Offer {
            from: from.to_string(),
            to: to.to_string(),
            payload,
        }
    }

    /// Build an answer message
    pub fn answer(from: &str, to: &str, payload: RTCSessionDescription) -> Self {
        Self::Answer {
            from: from.to_string(),
            to: to.to_string(),
            payload,
        }
    }

    /// Build an ICE candidate message
    pub fn ice_candidate(from: &str, to: &str, payload: RTCIceCandidateInit) -> Self {
        Self::IceCandidate {
            from: from.to_string(),
            to: to.to_string(),
            payload,
        }
    }

    /// Build a presence announcement
    pub fn join(from: &str) -> Self {
        Self::Join {
            from: from.to_string(),
        }
    }

    /// Build a departure notification
    pub fn leave(from: &str) -> Self {
        Self::Leave {
            from: from.to_string(),
        }
    }

    /// Sender participant ID
    pub fn from(&self) -> &str {
        match self {
            Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::IceCandidate { from, .. }
            | Self::Join { from }
            | Self::Leave { from } => from,
        }
    }

    /// Recipient participant ID; presence messages are relay-fanned and
    /// have none
    pub fn to(&self) -> Option<&str> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::IceCandidate { to, .. } => {
                Some(to)
            }
            Self::Join { .. } | Self::Leave { .. } => None,
        }
    }

    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::TransportError(format!("Failed to serialize signaling message: {}", e))
        })
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::TransportError(format!("Failed to deserialize signaling message: {}", e))
        })
    }
}
