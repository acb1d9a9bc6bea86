//! Data channel event types.

pub mod messages;

pub use messages::{ChannelEvent, MAX_EVENT_SIZE};
