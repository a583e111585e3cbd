//! Peer transport for rs-wasp.
//!
//! This crate provides:
//!
//! - [`PeerMessage`]: the wire envelope shared by all committees on a node
//! - [`PeeringManager`]: a TCP pool keyed by `host:port` location, with a
//!   handshake, heartbeats and liveness tracking
//! - [`PeerNetwork`] and [`MessageRouter`]: the traits committees send
//!   through and receive from, so tests can swap in an in-memory network
//!
//! For each pair of nodes exactly one side dials: the one whose location
//! sorts lower. The other side only accepts.

mod error;
mod manager;
pub mod message;
mod network;
mod peer;

pub use error::PeeringError;
pub use manager::{PeeringConfig, PeeringManager};
pub use message::{PeerMessage, FIRST_COMMITTEE_MSG, MSG_HANDSHAKE, MSG_HEARTBEAT};
pub use network::{MessageRouter, PeerNetwork};
pub use peer::{ConnectionDirection, Peer, PeerInfo, PeerState, PeerStats, PeerStatsSnapshot};

/// Result type for peering operations.
pub type Result<T> = std::result::Result<T, PeeringError>;
