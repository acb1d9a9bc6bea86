//! Relay seam between the session core and the embedder's signaling
//! transport

use async_trait::async_trait;

use super::protocol::SignalingMessage;
use crate::Result;

/// Outbound half of the signaling relay, implemented by the embedder
/// (WebSocket client, in-process router, test double)
///
/// Delivery is best-effort: the relay must preserve the order of
/// messages from one sender to one recipient, but nothing stronger than
/// at-least-once delivery is assumed. Inbound messages reach the core
/// through [`SessionManager::handle_incoming`] or an
/// [`attach_inbound`] channel pump rather than a callback field.
///
/// [`SessionManager::handle_incoming`]: crate::SessionManager::handle_incoming
/// [`attach_inbound`]: crate::SessionManager::attach_inbound
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Deliver a message to the recipient named inside it (presence
    /// messages fan out to every other participant)
    async fn send(&self, message: SignalingMessage) -> Result<()>;
}
