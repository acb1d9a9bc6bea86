//! Per-peer connection management.

pub mod link;

pub use link::{CloseReason, LinkState, PeerLink, TrackChange};
