//! In-memory peer network.
//!
//! Every node attached to a [`LocalHub`] gets an inbox drained by its own
//! task, so messages between two nodes arrive in send order, as on a TCP
//! connection. Messages cross the hub in their wire encoding. Links can be
//! cut and nodes isolated to simulate partitions and silent peers.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};
use wasp_peering::{MessageRouter, PeerMessage, PeerNetwork, PeeringError};

type Inbox = mpsc::UnboundedSender<(String, Vec<u8>)>;

#[derive(Default)]
pub struct LocalHub {
    inboxes: DashMap<String, Inbox>,
    cut: RwLock<HashSet<(String, String)>>,
    isolated: RwLock<HashSet<String>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Outbound side for the node at `location`.
    pub fn network(self: &Arc<Self>, location: impl Into<String>) -> Arc<LocalNetwork> {
        Arc::new(LocalNetwork {
            hub: self.clone(),
            location: location.into(),
        })
    }

    /// Deliver messages for `location` to `router` until the node detaches.
    pub fn attach(&self, location: &str, router: Arc<dyn MessageRouter>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        self.inboxes.insert(location.to_string(), tx);
        let own = location.to_string();
        tokio::spawn(async move {
            while let Some((from, bytes)) = rx.recv().await {
                match PeerMessage::decode(&bytes) {
                    Ok(msg) if msg.is_committee() => router.route(&from, msg),
                    Ok(_) => {}
                    Err(e) => warn!(to = %own, from = %from, error = %e, "Undecodable message"),
                }
            }
            trace!(location = %own, "Inbox closed");
        })
    }

    pub fn detach(&self, location: &str) {
        self.inboxes.remove(location);
    }

    pub fn detach_all(&self) {
        self.inboxes.clear();
    }

    /// Drop everything between `a` and `b` in both directions.
    pub fn cut(&self, a: &str, b: &str) {
        let mut cut = self.cut.write();
        cut.insert((a.to_string(), b.to_string()));
        cut.insert((b.to_string(), a.to_string()));
    }

    pub fn heal(&self, a: &str, b: &str) {
        let mut cut = self.cut.write();
        cut.remove(&(a.to_string(), b.to_string()));
        cut.remove(&(b.to_string(), a.to_string()));
    }

    /// Cut `location` off from every other node.
    pub fn isolate(&self, location: &str) {
        self.isolated.write().insert(location.to_string());
    }

    pub fn rejoin(&self, location: &str) {
        self.isolated.write().remove(location);
    }

    pub fn link_up(&self, from: &str, to: &str) -> bool {
        {
            let isolated = self.isolated.read();
            if isolated.contains(from) || isolated.contains(to) {
                return false;
            }
        }
        !self.cut.read().contains(&(from.to_string(), to.to_string()))
            && self.inboxes.contains_key(to)
    }

    /// Messages handed to an inbox.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages lost to cut links or isolation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, from: &str, to: &str, message: &PeerMessage) -> wasp_peering::Result<()> {
        if from == to {
            return Err(PeeringError::SendToSelf);
        }
        if !self.link_up(from, to) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(PeeringError::NotConnected(to.to_string()));
        }
        let Some(inbox) = self.inboxes.get(to).map(|e| e.value().clone()) else {
            return Err(PeeringError::UnknownPeer(to.to_string()));
        };
        inbox
            .send((from.to_string(), message.encode()?))
            .map_err(|_| PeeringError::NotConnected(to.to_string()))?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalHub")
            .field("nodes", &self.inboxes.len())
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// One node's view of a [`LocalHub`].
#[derive(Debug)]
pub struct LocalNetwork {
    hub: Arc<LocalHub>,
    location: String,
}

impl PeerNetwork for LocalNetwork {
    fn my_location(&self) -> &str {
        &self.location
    }

    fn send(&self, location: &str, message: &PeerMessage) -> wasp_peering::Result<()> {
        self.hub.send(&self.location, location, message)
    }

    fn is_alive(&self, location: &str) -> bool {
        self.hub.link_up(&self.location, location)
    }

    fn use_peer(&self, _location: &str) {}

    fn stop_using_peer(&self, _location: &str) {}
}
