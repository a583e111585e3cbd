//! The state manager: owner of the solid state.
//!
//! A batch becomes solid only when two things meet: the batch itself (from
//! the local operator or fetched from a peer) and the ledger transaction
//! approving the state it produces. Batches are applied strictly in index
//! order; when the node learns of a higher index it pulls the missing
//! batches one at a time from peers in permuted order.

use crate::committee::Committee;
use crate::config::StateSyncConfig;
use crate::events::{CommitteeEvent, StateTransitionMsg};
use crate::messages::{
    BatchHeaderMsg, CommitteeMsg, GetBatchMsg, StateIndexPingPongMsg, StateUpdateMsg,
};
use crate::node_conn::NodeConnection;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use wasp_common::{time, Permutation16, TxId};
use wasp_db::Partition;
use wasp_state::{origin, persist, Batch, ScTransaction, StateUpdate, VirtualState};

/// A batch being fetched from a peer.
#[derive(Debug)]
struct SyncingBatch {
    state_index: u32,
    header: Option<BatchHeaderMsg>,
    updates: Vec<Option<StateUpdate>>,
    deadline: Instant,
}

pub struct StateManager {
    committee: Arc<dyn Committee>,
    node_conn: Arc<dyn NodeConnection>,
    partition: Partition,
    config: StateSyncConfig,

    solid_state: Option<VirtualState>,
    /// Approving transaction of the solid state, once seen from the ledger.
    solid_tx: Option<Arc<ScTransaction>>,
    largest_evidenced: u32,

    /// Ledger-confirmed state transactions above the solid index.
    approving_txs: BTreeMap<u32, Arc<ScTransaction>>,
    /// Batches that may produce the next state.
    candidates: Vec<Batch>,
    syncing: Option<SyncingBatch>,
    permutation: Permutation16,

    next_ping: Instant,
    next_tx_request: Instant,
}

impl StateManager {
    /// Load the solid state, or start from the origin batch on a fresh node.
    pub fn new(
        committee: Arc<dyn Committee>,
        node_conn: Arc<dyn NodeConnection>,
        partition: Partition,
        config: StateSyncConfig,
    ) -> Self {
        let address = *committee.address();
        let permutation = Permutation16::new(committee.size(), address.as_bytes());
        let mut sm = Self {
            committee,
            node_conn,
            partition,
            config,
            solid_state: None,
            solid_tx: None,
            largest_evidenced: 0,
            approving_txs: BTreeMap::new(),
            candidates: Vec::new(),
            syncing: None,
            permutation,
            next_ping: Instant::now(),
            next_tx_request: Instant::now(),
        };
        sm.load();
        sm.committee.set_ready_state_manager();
        sm
    }

    fn load(&mut self) {
        let address = *self.committee.address();
        match persist::load_solid_state(&self.partition) {
            Ok(Some(state)) => {
                let index = state.state_index();
                info!(address = %address.short(), state_index = index, "Loaded solid state");
                self.largest_evidenced = index;
                self.solid_state = Some(state);
            }
            Ok(None) => {
                info!(address = %address.short(), "No solid state, starting from origin");
                self.candidates.push(origin::origin_batch(&address));
            }
            Err(e) => {
                error!(address = %address.short(), error = %e, "Failed to load solid state");
                self.candidates.push(origin::origin_batch(&address));
            }
        }
        self.request_solid_tx();
    }

    pub fn solid_state(&self) -> Option<&VirtualState> {
        self.solid_state.as_ref()
    }

    pub fn solid_index(&self) -> Option<u32> {
        self.solid_state.as_ref().map(VirtualState::state_index)
    }

    pub fn largest_evidenced(&self) -> u32 {
        self.largest_evidenced
    }

    /// Index of the next batch to apply.
    fn target_index(&self) -> u32 {
        self.solid_index().map_or(0, |i| i + 1)
    }

    pub fn is_synced(&self) -> bool {
        match self.solid_index() {
            Some(index) => self.solid_tx.is_some() && self.largest_evidenced <= index,
            None => false,
        }
    }

    pub fn evidence_state_index(&mut self, index: u32) {
        if index > self.largest_evidenced {
            debug!(
                address = %self.committee.address().short(),
                evidenced = index,
                solid = ?self.solid_index(),
                "Evidenced higher state index"
            );
            self.largest_evidenced = index;
        }
    }

    pub fn event_state_index_ping_pong(&mut self, msg: &StateIndexPingPongMsg) {
        if !msg.request_pong {
            return;
        }
        let Some(index) = self.solid_index() else {
            return;
        };
        let pong = CommitteeMsg::StateIndexPingPong(StateIndexPingPongMsg {
            sender_index: self.committee.own_peer_index(),
            state_index: index,
            request_pong: false,
        });
        if let Err(e) = self.committee.send_msg(msg.sender_index, &pong) {
            trace!(peer = msg.sender_index, error = %e, "Pong not sent");
        }
    }

    /// Answer a peer that is catching up.
    pub fn event_get_batch(&mut self, msg: &GetBatchMsg) {
        let batch = match persist::load_batch(&self.partition, msg.batch_index) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                debug!(batch_index = msg.batch_index, peer = msg.sender_index, "Requested batch not stored");
                return;
            }
            Err(e) => {
                error!(batch_index = msg.batch_index, error = %e, "Failed to load batch");
                return;
            }
        };
        let Ok(size) = u16::try_from(batch.size()) else {
            error!(batch_index = msg.batch_index, size = batch.size(), "Stored batch too large to serve");
            return;
        };
        let own = self.committee.own_peer_index();
        let header = CommitteeMsg::BatchHeader(BatchHeaderMsg {
            sender_index: own,
            state_index: batch.state_index,
            size,
            state_txid: batch.state_txid,
            timestamp: batch.timestamp,
        });
        if let Err(e) = self.committee.send_msg(msg.sender_index, &header) {
            debug!(peer = msg.sender_index, error = %e, "Failed to send batch header");
            return;
        }
        for (i, update) in (0..size).zip(batch.updates) {
            let msg_update = CommitteeMsg::StateUpdate(StateUpdateMsg {
                sender_index: own,
                state_index: batch.state_index,
                batch_index: i,
                state_update: update,
            });
            if let Err(e) = self.committee.send_msg(msg.sender_index, &msg_update) {
                debug!(peer = msg.sender_index, error = %e, "Failed to send state update");
                return;
            }
        }
        debug!(state_index = batch.state_index, peer = msg.sender_index, "Sent batch");
    }

    pub fn event_batch_header(&mut self, msg: BatchHeaderMsg) {
        let Some(syncing) = self.syncing.as_mut() else {
            return;
        };
        if syncing.state_index != msg.state_index || syncing.header.is_some() {
            return;
        }
        syncing.updates = vec![None; msg.size as usize];
        syncing.header = Some(msg);
        self.check_syncing_complete();
    }

    pub fn event_state_update(&mut self, msg: StateUpdateMsg) {
        let Some(syncing) = self.syncing.as_mut() else {
            return;
        };
        if syncing.state_index != msg.state_index || syncing.header.is_none() {
            return;
        }
        match syncing.updates.get_mut(msg.batch_index as usize) {
            Some(slot) => *slot = Some(msg.state_update),
            None => {
                warn!(batch_index = msg.batch_index, "State update out of batch range");
                return;
            }
        }
        self.check_syncing_complete();
    }

    fn check_syncing_complete(&mut self) {
        let complete = self
            .syncing
            .as_ref()
            .is_some_and(|s| s.header.is_some() && s.updates.iter().all(Option::is_some));
        if !complete {
            return;
        }
        let Some(SyncingBatch {
            header: Some(header),
            updates,
            ..
        }) = self.syncing.take()
        else {
            return;
        };
        let updates: Vec<StateUpdate> = updates.into_iter().flatten().collect();
        let batch = Batch::new(header.state_index, header.timestamp, updates)
            .with_state_txid(header.state_txid);
        debug!(
            state_index = batch.state_index,
            size = batch.size(),
            from = header.sender_index,
            "Batch fetched"
        );
        self.add_candidate(batch);
        self.continue_sync();
    }

    /// Batch computed by the local operator.
    pub fn event_pending_batch(&mut self, batch: Batch) {
        trace!(state_index = batch.state_index, txid = %batch.state_txid, "Pending batch");
        self.add_candidate(batch);
    }

    fn add_candidate(&mut self, batch: Batch) {
        if batch.state_index != self.target_index() {
            debug!(
                state_index = batch.state_index,
                expected = self.target_index(),
                "Dropping candidate batch for wrong index"
            );
            return;
        }
        let txid = batch.state_txid;
        if !self
            .candidates
            .iter()
            .any(|b| b.state_txid == txid && b.essence_hash() == batch.essence_hash())
        {
            self.candidates.push(batch);
        }
        if !self.approving_txs.contains_key(&self.target_index()) && !txid.is_zero() {
            self.node_conn
                .request_confirmed_transaction(&txid, self.committee.address());
        }
        self.try_apply();
    }

    /// Ledger confirmed a state transaction for this contract.
    pub fn event_state_transaction(&mut self, tx: Arc<ScTransaction>) {
        let Some(sb) = tx.state_block.as_ref() else {
            return;
        };
        if sb.address != *self.committee.address() {
            warn!(address = %sb.address.short(), "State transaction for another contract");
            return;
        }
        let index = sb.state_index;

        if let Some(solid) = self.solid_state.as_ref() {
            if index < solid.state_index() {
                return;
            }
            if index == solid.state_index() {
                if self.solid_tx.is_none() {
                    if sb.state_hash != solid.hash() {
                        error!(state_index = index, "Stored solid state does not match the ledger");
                        return;
                    }
                    self.solid_tx = Some(tx.clone());
                    info!(state_index = index, "Solid state approved by the ledger");
                    self.notify_transition(solid.clone(), tx, Vec::new());
                }
                return;
            }
        }

        self.evidence_state_index(index);
        self.approving_txs.insert(index, tx);
        self.try_apply();
        self.continue_sync();
    }

    /// Fetch the next missing batch if the ledger is ahead and nothing is
    /// in flight for it.
    fn continue_sync(&mut self) {
        let Some(solid) = self.solid_index() else {
            return;
        };
        if self.syncing.is_some() || self.largest_evidenced <= solid {
            return;
        }
        let target = self.target_index();
        if self.candidates.iter().any(|b| b.state_index == target) {
            return;
        }
        self.request_next_batch();
    }

    fn try_apply(&mut self) {
        loop {
            let target = self.target_index();
            let Some(tx) = self.approving_txs.get(&target).cloned() else {
                return;
            };
            let Some(expected_hash) = tx.state_block.as_ref().map(|sb| sb.state_hash) else {
                return;
            };
            let txid = tx.id();
            let base = self.solid_state.clone().unwrap_or_default();
            if !self.candidates.iter().any(|b| b.state_txid == txid) {
                self.load_pending_candidate(&txid);
            }

            let mut found = None;
            let mut i = 0;
            while i < self.candidates.len() {
                let batch = &self.candidates[i];
                if batch.state_index != target
                    || !(batch.state_txid == txid || batch.state_txid.is_zero())
                {
                    i += 1;
                    continue;
                }
                match base.with_batch(batch) {
                    Ok(next) if next.hash() == expected_hash => {
                        found = Some((self.candidates.swap_remove(i), next));
                        break;
                    }
                    Ok(_) => {
                        warn!(state_index = target, "Candidate batch does not produce the approved state");
                        self.candidates.swap_remove(i);
                    }
                    Err(e) => {
                        warn!(state_index = target, error = %e, "Candidate batch cannot be applied");
                        self.candidates.swap_remove(i);
                    }
                }
            }
            let Some((batch, next)) = found else {
                return;
            };

            let batch = batch.with_state_txid(txid);
            if let Err(e) = persist::save_solid_state(&self.partition, &next, &batch) {
                error!(state_index = target, error = %e, "Failed to persist solid state");
                self.candidates.push(batch);
                return;
            }
            info!(
                address = %self.committee.address().short(),
                state_index = target,
                requests = batch.size(),
                txid = %txid,
                "State transition"
            );
            self.solid_state = Some(next.clone());
            self.solid_tx = Some(tx.clone());
            self.approving_txs.retain(|i, _| *i > target);
            self.candidates.retain(|b| b.state_index > target);
            if self.syncing.as_ref().is_some_and(|s| s.state_index <= target) {
                self.syncing = None;
            }
            self.evidence_state_index(target);
            self.notify_transition(next, tx, batch.request_ids());
        }
    }

    /// A batch this node finalized before a restart is kept in the store.
    fn load_pending_candidate(&mut self, txid: &TxId) {
        match persist::load_pending_batch(&self.partition, txid) {
            Ok(Some(batch)) => {
                debug!(state_index = batch.state_index, txid = %txid, "Stored pending batch found");
                self.candidates.push(batch);
            }
            Ok(None) => {}
            Err(e) => warn!(txid = %txid, error = %e, "Failed to load pending batch"),
        }
    }

    fn notify_transition(&self, state: VirtualState, state_tx: Arc<ScTransaction>, request_ids: Vec<wasp_common::RequestId>) {
        self.committee
            .post_event(CommitteeEvent::StateTransition(StateTransitionMsg {
                state,
                state_tx,
                request_ids,
            }));
    }

    /// Ask the next peer in sequence for the batch after the solid state.
    fn request_next_batch(&mut self) {
        let target = self.target_index();
        if target == 0 || self.committee.num_peers() == 0 {
            return;
        }
        let msg = CommitteeMsg::GetBatch(GetBatchMsg {
            sender_index: self.committee.own_peer_index(),
            batch_index: target,
        });
        let start = self.permutation.cursor();
        match self
            .committee
            .send_msg_in_sequence(&msg, start, self.permutation.get_array())
        {
            Ok(slot) => {
                while self.permutation.cursor() != slot {
                    self.permutation.next();
                }
                self.permutation.next();
                debug!(batch_index = target, "Requested batch");
            }
            Err(e) => {
                debug!(batch_index = target, error = %e, "Could not request batch");
            }
        }
        self.syncing = Some(SyncingBatch {
            state_index: target,
            header: None,
            updates: Vec::new(),
            deadline: Instant::now() + self.config.sync_retry_period,
        });
    }

    fn request_solid_tx(&mut self) {
        let address = *self.committee.address();
        let txid: TxId = match self.solid_index() {
            None => *self.committee.color(),
            Some(index) => match persist::load_batch(&self.partition, index) {
                Ok(Some(batch)) => batch.state_txid,
                Ok(None) => {
                    error!(state_index = index, "Solid batch missing from store");
                    return;
                }
                Err(e) => {
                    error!(state_index = index, error = %e, "Failed to load solid batch");
                    return;
                }
            },
        };
        self.node_conn.request_confirmed_transaction(&txid, &address);
        self.next_tx_request = Instant::now() + self.config.sync_retry_period;
    }

    pub fn event_timer(&mut self, tick: u64) {
        let now = Instant::now();

        if self.solid_tx.is_none() && now >= self.next_tx_request {
            trace!(tick, "Re-requesting approving transaction of solid state");
            self.request_solid_tx();
        }

        if !self.is_synced() && self.solid_state.is_some() {
            let expired = self.syncing.as_ref().map_or(true, |s| now >= s.deadline);
            if expired && self.largest_evidenced > self.solid_index().unwrap_or(0) {
                self.syncing = None;
                self.request_next_batch();
            }
            let target = self.target_index();
            if !self.approving_txs.contains_key(&target) && now >= self.next_tx_request {
                let txids: Vec<TxId> = self
                    .candidates
                    .iter()
                    .filter(|b| b.state_index == target && !b.state_txid.is_zero())
                    .map(|b| b.state_txid)
                    .collect();
                for txid in txids {
                    self.node_conn
                        .request_confirmed_transaction(&txid, self.committee.address());
                }
                self.next_tx_request = now + self.config.sync_retry_period;
            }
        }

        if now >= self.next_ping {
            if let Some(index) = self.solid_index() {
                let ping = CommitteeMsg::StateIndexPingPong(StateIndexPingPongMsg {
                    sender_index: self.committee.own_peer_index(),
                    state_index: index,
                    request_pong: true,
                });
                self.committee.send_msg_to_committee_peers(&ping, time::now_nanos());
            }
            let period = if self.is_synced() {
                self.config.ping_period
            } else {
                self.config.sync_retry_period
            };
            self.next_ping = now + period;
        }
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("solid_index", &self.solid_index())
            .field("largest_evidenced", &self.largest_evidenced)
            .field("candidates", &self.candidates.len())
            .finish()
    }
}
