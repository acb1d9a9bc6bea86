//! Events surfaced to the embedder.
//!
//! All component events funnel into one `tokio::sync::broadcast` stream
//! obtained from [`SessionManager::subscribe`]. Dropping the receiver
//! unsubscribes; slow receivers observe `Lagged` rather than blocking
//! the session.
//!
//! [`SessionManager::subscribe`]: crate::session::SessionManager::subscribe

use std::fmt;
use std::sync::Arc;

use webrtc::track::track_remote::TrackRemote;

use crate::channels::ChannelEvent;
use crate::media::MediaKind;
use crate::peer::LinkState;

/// A session-level event.
#[derive(Clone)]
pub enum SessionEvent {
    /// A remote participant's track arrived. The embedder owns reading
    /// RTP from it (rendering, recording, forwarding).
    RemoteTrackAdded {
        /// Remote participant the track belongs to.
        peer_id: String,
        /// Audio or video.
        kind: MediaKind,
        /// The incoming RTP track.
        track: Arc<TrackRemote>,
    },

    /// A previously announced remote track is gone, which happens when
    /// its link closes.
    RemoteTrackRemoved {
        /// Remote participant the track belonged to.
        peer_id: String,
        /// Audio or video.
        kind: MediaKind,
    },

    /// A link changed state.
    ConnectionStateChanged {
        /// Remote participant of the link.
        peer_id: String,
        /// The state entered.
        state: LinkState,
    },

    /// The local speaking state flipped.
    SpeakingChanged {
        /// The local participant id.
        peer_id: String,
        /// `true` on a rising edge.
        speaking: bool,
    },

    /// An application event arrived on a peer's data channel.
    ChannelMessage {
        /// Remote participant that sent it.
        peer_id: String,
        /// The decoded event.
        event: ChannelEvent,
    },
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::RemoteTrackAdded { peer_id, kind, .. } => f
                .debug_struct("RemoteTrackAdded")
                .field("peer_id", peer_id)
                .field("kind", kind)
                .finish_non_exhaustive(),
            SessionEvent::RemoteTrackRemoved { peer_id, kind } => f
                .debug_struct("RemoteTrackRemoved")
                .field("peer_id", peer_id)
                .field("kind", kind)
                .finish(),
            SessionEvent::ConnectionStateChanged { peer_id, state } => f
                .debug_struct("ConnectionStateChanged")
                .field("peer_id", peer_id)
                .field("state", state)
                .finish(),
            SessionEvent::SpeakingChanged { peer_id, speaking } => f
                .debug_struct("SpeakingChanged")
                .field("peer_id", peer_id)
                .field("speaking", speaking)
                .finish(),
            SessionEvent::ChannelMessage { peer_id, event } => f
                .debug_struct("ChannelMessage")
                .field("peer_id", peer_id)
                .field("event", event)
                .finish(),
        }
    }
}
