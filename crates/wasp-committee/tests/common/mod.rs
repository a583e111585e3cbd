#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use wasp_committee::{
    Committee, CommitteeEvent, CommitteeMsg, NodeConnection, PeerStatus, RequestProcessingStatus,
    Result,
};
use wasp_common::{Address, Color, RequestId, TxId};
use wasp_db::{MemoryStore, Partition};
use wasp_state::origin::{create_origin_transaction, OriginParams};
use wasp_state::ScTransaction;
use wasp_vm::builtin;
use wasp_vm::{ProcessorRegistry, VmRunner};

/// Committee that records everything instead of sending it.
pub struct RecordingCommittee {
    pub address: Address,
    pub owner: Address,
    pub color: Color,
    pub size: u16,
    pub quorum: u16,
    pub own_index: u16,
    pub dead: Mutex<HashSet<u16>>,
    pub sent: Mutex<Vec<(u16, CommitteeMsg)>>,
    pub broadcast: Mutex<Vec<(CommitteeMsg, i64)>>,
    pub events: Mutex<Vec<CommitteeEvent>>,
}

impl RecordingCommittee {
    pub fn new(setup: &Setup, own_index: u16) -> Arc<Self> {
        Arc::new(Self {
            address: setup.address,
            owner: setup.owner,
            color: setup.origin_tx.id(),
            size: setup.size,
            quorum: setup.quorum,
            own_index,
            dead: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            broadcast: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn take_sent(&self) -> Vec<(u16, CommitteeMsg)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn take_broadcast(&self) -> Vec<(CommitteeMsg, i64)> {
        std::mem::take(&mut *self.broadcast.lock())
    }

    pub fn take_events(&self) -> Vec<CommitteeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Wait for an internal event matching `pred` and return it.
    pub async fn wait_event<F>(&self, pred: F) -> CommitteeEvent
    where
        F: Fn(&CommitteeEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                {
                    let mut events = self.events.lock();
                    if let Some(pos) = events.iter().position(&pred) {
                        return events.remove(pos);
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event not posted in time")
    }
}

impl Committee for RecordingCommittee {
    fn address(&self) -> &Address {
        &self.address
    }

    fn owner_address(&self) -> &Address {
        &self.owner
    }

    fn color(&self) -> &Color {
        &self.color
    }

    fn size(&self) -> u16 {
        self.size
    }

    fn quorum(&self) -> u16 {
        self.quorum
    }

    fn own_peer_index(&self) -> u16 {
        self.own_index
    }

    fn num_peers(&self) -> u16 {
        self.size - 1
    }

    fn send_msg(&self, target: u16, msg: &CommitteeMsg) -> Result<()> {
        self.sent.lock().push((target, msg.clone()));
        Ok(())
    }

    fn send_msg_to_committee_peers(&self, msg: &CommitteeMsg, ts: i64) -> u16 {
        self.broadcast.lock().push((msg.clone(), ts));
        (0..self.size)
            .filter(|i| *i != self.own_index && self.is_alive_peer(*i))
            .count() as u16
    }

    fn send_msg_in_sequence(&self, msg: &CommitteeMsg, start: u16, sequence: &[u16]) -> Result<u16> {
        let len = sequence.len();
        for k in 0..len {
            let slot = (start as usize + k) % len;
            let peer = sequence[slot];
            if peer != self.own_index && self.is_alive_peer(peer) {
                self.sent.lock().push((peer, msg.clone()));
                return Ok(slot as u16);
            }
        }
        Err(wasp_committee::CommitteeError::NoPeerReachable)
    }

    fn is_alive_peer(&self, index: u16) -> bool {
        !self.dead.lock().contains(&index)
    }

    fn receive_message(&self, event: CommitteeEvent) {
        self.events.lock().push(event);
    }

    fn post_event(&self, event: CommitteeEvent) {
        self.events.lock().push(event);
    }

    fn init_test_round(&self) {}

    fn peer_status(&self) -> Vec<PeerStatus> {
        Vec::new()
    }

    fn set_ready_state_manager(&self) {}

    fn set_ready_consensus(&self) {}

    fn dismiss(&self) {}

    fn is_dismissed(&self) -> bool {
        false
    }

    fn get_request_processing_status(&self, _id: &RequestId) -> RequestProcessingStatus {
        RequestProcessingStatus::Unknown
    }
}

/// Ledger client that only records calls.
#[derive(Default)]
pub struct RecordingNodeConn {
    pub posted: Mutex<Vec<ScTransaction>>,
    pub confirmed_requests: Mutex<Vec<TxId>>,
    pub inclusion_requests: Mutex<Vec<TxId>>,
    pub balances_requests: Mutex<usize>,
}

impl NodeConnection for RecordingNodeConn {
    fn subscribe(&self, _address: &Address) {}

    fn unsubscribe(&self, _address: &Address) {}

    fn post_transaction(&self, tx: &ScTransaction) {
        self.posted.lock().push(tx.clone());
    }

    fn request_inclusion_level(&self, txid: &TxId, _address: &Address) {
        self.inclusion_requests.lock().push(*txid);
    }

    fn request_confirmed_transaction(&self, txid: &TxId, _address: &Address) {
        self.confirmed_requests.lock().push(*txid);
    }

    fn request_balances(&self, _address: &Address) {
        *self.balances_requests.lock() += 1;
    }
}

/// A counter contract at its origin.
pub struct Setup {
    pub address: Address,
    pub owner: Address,
    pub size: u16,
    pub quorum: u16,
    pub origin_tx: Arc<ScTransaction>,
}

impl Setup {
    pub fn new(size: u16, quorum: u16) -> Self {
        let address = Address::from_key_material(b"test contract");
        let owner = Address::from_key_material(b"test owner");
        let origin_tx = create_origin_transaction(&OriginParams {
            address,
            owner,
            program_hash: builtin::program_hash(builtin::INCCOUNTER),
            description: "test".into(),
            minimum_reward: 0,
        });
        Self {
            address,
            owner,
            size,
            quorum,
            origin_tx: Arc::new(origin_tx),
        }
    }

    pub fn partition(&self) -> Partition {
        Partition::new(Arc::new(MemoryStore::new()), self.address)
    }
}

pub fn runner() -> VmRunner {
    let registry = ProcessorRegistry::new();
    builtin::register_builtins(&registry).expect("builtins");
    VmRunner::new(Arc::new(registry), 2)
}
