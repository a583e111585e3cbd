use crate::events::CommitteeEvent;
use crate::messages::CommitteeMsg;
use crate::Result;
use std::fmt;
use wasp_common::{Address, Color, RequestId};

/// One peer as seen from this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub index: u16,
    /// `host:port` of the peer.
    pub peering_id: String,
    pub is_self: bool,
    pub connected: bool,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}{} {}",
            self.index,
            self.peering_id,
            if self.is_self { " (self)" } else { "" },
            if self.connected { "up" } else { "down" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProcessingStatus {
    Unknown,
    /// Waiting in the operator's backlog.
    Backlog,
    /// Processed by an applied batch.
    Completed,
}

/// The committee of one contract: membership, addressing and the single
/// queue every event goes through.
pub trait Committee: Send + Sync {
    fn address(&self) -> &Address;

    fn owner_address(&self) -> &Address;

    fn color(&self) -> &Color;

    /// N.
    fn size(&self) -> u16;

    /// T.
    fn quorum(&self) -> u16;

    fn own_peer_index(&self) -> u16;

    /// Peers other than self.
    fn num_peers(&self) -> u16;

    /// Unicast. Fails for self, out-of-range indices and unreachable peers.
    fn send_msg(&self, target: u16, msg: &CommitteeMsg) -> Result<()>;

    /// Send to every live peer with envelope timestamp `ts`. Returns how many were reached.
    fn send_msg_to_committee_peers(&self, msg: &CommitteeMsg, ts: i64) -> u16;

    /// Try peers in `sequence` order starting at slot `start`, skipping self
    /// and dead peers. Returns the slot of the peer that took the message.
    fn send_msg_in_sequence(&self, msg: &CommitteeMsg, start: u16, sequence: &[u16]) -> Result<u16>;

    /// Self always counts as alive.
    fn is_alive_peer(&self, index: u16) -> bool;

    /// Entry point for events from outside: peers, ledger, API.
    fn receive_message(&self, event: CommitteeEvent);

    /// Entry point for events the committee generates itself. Never dropped.
    fn post_event(&self, event: CommitteeEvent);

    /// Start a test trace around the committee.
    fn init_test_round(&self);

    /// At least T peers reachable, counting self.
    fn has_quorum(&self) -> bool {
        let alive = (0..self.size()).filter(|i| self.is_alive_peer(*i)).count();
        alive >= self.quorum() as usize
    }

    fn peer_status(&self) -> Vec<PeerStatus>;

    fn set_ready_state_manager(&self);

    fn set_ready_consensus(&self);

    fn dismiss(&self);

    fn is_dismissed(&self) -> bool;

    fn get_request_processing_status(&self, id: &RequestId) -> RequestProcessingStatus;
}
