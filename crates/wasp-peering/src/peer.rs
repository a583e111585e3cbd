//! One entry of the peer pool.
//!
//! A [`Peer`] exists as long as some committee uses its location, whether
//! or not a connection is currently up. The connection's writer task owns
//! the socket; the peer only keeps the sending end of its queue.

use crate::{PeeringError, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use wasp_common::time;

/// Connection state of a pooled peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No connection.
    Disconnected,
    /// TCP up, waiting for the handshake.
    Handshaking,
    /// Handshake done, messages flow.
    Connected,
}

impl PeerState {
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Handshaking | PeerState::Connected)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PeerState::Connected)
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

/// Traffic counters for a peer.
#[derive(Debug, Default)]
pub struct PeerStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub send_failures: AtomicU64,
}

impl PeerStats {
    pub fn snapshot(&self) -> PeerStatsSnapshot {
        PeerStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PeerStatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
}

/// Point-in-time view of a peer, for status output.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub location: String,
    pub state: PeerState,
    pub direction: Option<ConnectionDirection>,
    pub connected_at: Option<Instant>,
    /// Committees using this peer.
    pub usage: usize,
    pub alive: bool,
    pub stats: PeerStatsSnapshot,
}

struct Link {
    sender: mpsc::Sender<Vec<u8>>,
    direction: ConnectionDirection,
    connected_at: Instant,
    id: u64,
}

/// A pooled peer, addressed by its `host:port` location.
pub struct Peer {
    location: String,
    state: RwLock<PeerState>,
    link: RwLock<Option<Link>>,
    last_heard: AtomicI64,
    usage: AtomicUsize,
    next_link_id: AtomicU64,
    stats: Arc<PeerStats>,
}

impl Peer {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            state: RwLock::new(PeerState::Disconnected),
            link: RwLock::new(None),
            last_heard: AtomicI64::new(0),
            usage: AtomicUsize::new(0),
            next_link_id: AtomicU64::new(1),
            stats: Arc::new(PeerStats::default()),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub(crate) fn set_handshaking(&self) {
        let mut state = self.state.write();
        if !state.is_ready() {
            *state = PeerState::Handshaking;
        }
    }

    pub fn stats(&self) -> &Arc<PeerStats> {
        &self.stats
    }

    pub(crate) fn acquire(&self) -> usize {
        self.usage.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the usage count, returning what is left.
    pub(crate) fn release(&self) -> usize {
        let prev = self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    /// Install a live connection. Returns its id, or `None` if one is already up.
    pub(crate) fn attach(&self, sender: mpsc::Sender<Vec<u8>>, direction: ConnectionDirection) -> Option<u64> {
        let mut link = self.link.write();
        if link.is_some() {
            return None;
        }
        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        *link = Some(Link {
            sender,
            direction,
            connected_at: Instant::now(),
            id,
        });
        *self.state.write() = PeerState::Connected;
        self.touch();
        debug!(peer = %self.location, ?direction, "Peer connected");
        Some(id)
    }

    /// Drop connection `id` if it is still the current one.
    pub(crate) fn detach(&self, id: u64) {
        let mut link = self.link.write();
        if link.as_ref().is_some_and(|l| l.id == id) {
            *link = None;
            *self.state.write() = PeerState::Disconnected;
            debug!(peer = %self.location, "Peer disconnected");
        }
    }

    /// A dial or handshake attempt failed. Leaves a live connection alone.
    pub(crate) fn connect_failed(&self) {
        let link = self.link.read();
        if link.is_none() {
            *self.state.write() = PeerState::Disconnected;
        }
    }

    pub(crate) fn close(&self) {
        *self.link.write() = None;
        *self.state.write() = PeerState::Disconnected;
    }

    /// Record that something arrived from this peer.
    pub(crate) fn touch(&self) {
        self.last_heard.store(time::now_nanos(), Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.touch();
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Connected and heard from within `dead_after`.
    pub fn is_alive(&self, dead_after: Duration) -> bool {
        if !self.state().is_ready() {
            return false;
        }
        let last = self.last_heard.load(Ordering::Relaxed);
        time::skew(time::now_nanos(), last) <= dead_after
    }

    /// Queue an encoded message for the writer task. Never blocks.
    pub fn send_bytes(&self, frame: Vec<u8>) -> Result<()> {
        let link = self.link.read();
        let Some(link) = link.as_ref() else {
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            return Err(PeeringError::NotConnected(self.location.clone()));
        };
        let len = frame.len() as u64;
        match link.sender.try_send(frame) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
                trace!(peer = %self.location, bytes = len, "Queued message");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(PeeringError::QueueFull(self.location.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(PeeringError::NotConnected(self.location.clone()))
            }
        }
    }

    pub fn info(&self, dead_after: Duration) -> PeerInfo {
        let link = self.link.read();
        PeerInfo {
            location: self.location.clone(),
            state: self.state(),
            direction: link.as_ref().map(|l| l.direction),
            connected_at: link.as_ref().map(|l| l.connected_at),
            usage: self.usage(),
            alive: self.is_alive(dead_after),
            stats: self.stats.snapshot(),
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("location", &self.location)
            .field("state", &self.state())
            .field("usage", &self.usage())
            .finish()
    }
}
