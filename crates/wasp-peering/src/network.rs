//! The seams between peering and the committees that use it.

use crate::message::PeerMessage;
use crate::Result;

/// Outbound side of the peer network, as a committee sees it.
///
/// Sends are fire-and-forget: `Ok` means the message was queued for the
/// connection, not that it arrived.
pub trait PeerNetwork: Send + Sync {
    /// This node's own `host:port`.
    fn my_location(&self) -> &str;

    fn send(&self, location: &str, message: &PeerMessage) -> Result<()>;

    /// Connected and recently heard from.
    fn is_alive(&self, location: &str) -> bool;

    /// Keep a connection to `location` for as long as someone uses it.
    fn use_peer(&self, location: &str);

    fn stop_using_peer(&self, location: &str);
}

/// Inbound side: receives every committee message with the sender's location.
pub trait MessageRouter: Send + Sync {
    fn route(&self, from: &str, message: PeerMessage);
}
