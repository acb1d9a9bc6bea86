//! Signaling protocol and relay seam
//!
//! The session core never opens its own signaling transport; it builds
//! [`SignalingMessage`]s and hands them to an embedder-provided
//! [`SignalingRelay`], and consumes inbound messages the embedder
//! routes back in.

pub mod protocol;
pub mod relay;

pub use protocol::SignalingMessage;
pub use relay::SignalingRelay;
