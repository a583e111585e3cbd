//! The consensus operator: one round per state transition.
//!
//! Every state transition reseeds the leader permutation from the approving
//! transaction id, so all honest peers agree on who leads without any
//! election traffic. Followers tell the leader which requests they hold.
//! Once T peers have seen a request the leader puts it into a batch,
//! announces it, and every member computes the batch independently and signs
//! the essence of the result transaction. T matching shares make the joint
//! signature; the leader posts the transaction and everyone watches the
//! ledger until the state manager reports the next transition. A stage
//! deadline that passes rotates leadership to the next peer in the
//! permutation.

mod backlog;
mod round;
mod stage;

pub use stage::Stage;

use crate::committee::Committee;
use crate::config::ConsensusConfig;
use crate::events::{CommitteeEvent, InclusionLevel, RequestMsg, StateTransitionMsg};
use crate::messages::{
    notify_requests_chunked, CommitteeMsg, NotifyFinalResultPostedMsg, NotifyReqMsg, SignedHashMsg,
    StartProcessingBatchMsg,
};
use crate::node_conn::NodeConnection;
use backlog::{Backlog, RequestEntry};
use parking_lot::RwLock;
use round::{LeaderStatus, SignedResult};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use wasp_common::{digest, time, Hash256, Permutation16, RequestId, TxId};
use wasp_crypto::ThresholdSigner;
use wasp_db::Partition;
use wasp_state::{balances_hash, persist, vars, Balances, ScTransaction, VirtualState};
use wasp_vm::{RequestRef, VmRunner, VmTask};

pub struct Operator {
    committee: Arc<dyn Committee>,
    signer: Arc<dyn ThresholdSigner>,
    node_conn: Arc<dyn NodeConnection>,
    runner: VmRunner,
    partition: Partition,
    config: ConsensusConfig,

    state: Option<VirtualState>,
    state_tx: Option<Arc<ScTransaction>>,
    balances: Option<Balances>,
    next_balances_request: Instant,
    /// Program hash of the current state, if any.
    program_hash: Option<Hash256>,
    processor_ready: bool,
    /// The state manager holds every state the ledger has evidenced.
    state_synced: bool,

    stage: Stage,
    stage_deadline: Instant,
    backlog: Backlog,
    permutation: Permutation16,

    leader_status: Option<LeaderStatus>,
    /// Follower side: batch hash of the computation in flight.
    follower_batch_hash: Option<Hash256>,
    posted_result_txid: Option<TxId>,
    next_inclusion_poll: Instant,
    next_renotify: Instant,
}

impl Operator {
    /// `backlog_mirror` is kept in sync with the backlog so request status
    /// can be answered outside the committee task.
    pub fn new(
        committee: Arc<dyn Committee>,
        signer: Arc<dyn ThresholdSigner>,
        node_conn: Arc<dyn NodeConnection>,
        runner: VmRunner,
        partition: Partition,
        config: ConsensusConfig,
        backlog_mirror: Arc<RwLock<HashSet<RequestId>>>,
    ) -> Self {
        let size = committee.size();
        let own = committee.own_peer_index();
        let permutation = Permutation16::new(size, committee.address().as_bytes());
        let now = Instant::now();
        let stage_deadline = now + Stage::NoSync.timeout(&config);
        let op = Self {
            committee,
            signer,
            node_conn,
            runner,
            partition,
            config,
            state: None,
            state_tx: None,
            balances: None,
            next_balances_request: now,
            program_hash: None,
            processor_ready: false,
            state_synced: false,
            stage: Stage::NoSync,
            stage_deadline,
            backlog: Backlog::new(size, own, backlog_mirror),
            permutation,
            leader_status: None,
            follower_batch_hash: None,
            posted_result_txid: None,
            next_inclusion_poll: now,
            next_renotify: now,
        };
        op.committee.set_ready_consensus();
        op
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn state_index(&self) -> Option<u32> {
        self.state.as_ref().map(VirtualState::state_index)
    }

    /// Peer index of the current leader. Meaningless before the first transition.
    pub fn current_leader(&self) -> u16 {
        self.permutation.current()
    }

    /// Track the state manager. No batch is started while a state above
    /// the current one is known to exist.
    pub fn set_state_synced(&mut self, synced: bool) {
        if synced != self.state_synced {
            debug!(synced, state_index = ?self.state_index(), "State sync changed");
        }
        self.state_synced = synced;
    }

    pub fn is_request_in_backlog(&self, id: &RequestId) -> bool {
        self.backlog.contains(id)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn own_index(&self) -> u16 {
        self.committee.own_peer_index()
    }

    fn i_am_leader(&self) -> bool {
        self.current_leader() == self.own_index()
    }

    fn set_stage(&mut self, stage: Stage) {
        if stage != self.stage {
            trace!(from = %self.stage, to = %stage, "Stage change");
        }
        self.stage = stage;
        self.stage_deadline = Instant::now() + stage.timeout(&self.config);
    }

    fn is_processed(&self, id: &RequestId) -> bool {
        match persist::is_request_processed(&self.partition, id) {
            Ok(done) => done,
            Err(e) => {
                warn!(request = %id.short(), error = %e, "Failed to check request status");
                false
            }
        }
    }

    // ----- state ---------------------------------------------------------

    pub fn event_state_transition(&mut self, msg: StateTransitionMsg) {
        let StateTransitionMsg {
            state,
            state_tx,
            request_ids,
        } = msg;
        if let Some(current) = self.state_index() {
            if state.state_index() < current {
                return;
            }
        }
        let index = state.state_index();
        let state_txid = state_tx.id();

        self.backlog.remove(&request_ids);
        let processed: Vec<RequestId> = self
            .backlog
            .known_ids()
            .into_iter()
            .filter(|id| self.is_processed(id))
            .collect();
        self.backlog.remove(&processed);
        self.backlog.reset_notifications();

        self.program_hash = match state.get_hash(vars::VAR_PROGRAM_HASH) {
            Ok(hash) => hash.filter(|h| !h.is_zero()),
            Err(e) => {
                warn!(error = %e, "Program hash variable is corrupted");
                None
            }
        };
        self.state = Some(state);
        self.state_tx = Some(state_tx);
        self.permutation = Permutation16::new(self.committee.size(), state_txid.as_bytes());
        self.reset_round();

        for msg in self.backlog.take_notifications_for(index) {
            self.backlog.mark_notified(msg.sender_index, &msg.request_ids, Instant::now());
        }

        self.balances = None;
        self.request_balances();
        self.check_processor();

        info!(
            address = %self.committee.address().short(),
            state_index = index,
            leader = self.current_leader(),
            backlog = self.backlog.len(),
            "New round"
        );
        self.enter_starting_stage();
    }

    fn reset_round(&mut self) {
        self.leader_status = None;
        self.follower_batch_hash = None;
        self.posted_result_txid = None;
    }

    fn enter_starting_stage(&mut self) {
        if self.i_am_leader() {
            self.set_stage(Stage::LeaderStarting);
            self.try_start_batch();
        } else {
            self.set_stage(Stage::SubStarting);
            self.notify_leader();
        }
    }

    /// Give up on the current round and hand leadership to the next peer.
    fn rotate_leader(&mut self) {
        if self.state.is_none() {
            return;
        }
        let previous = self.current_leader();
        self.permutation.next();
        self.reset_round();
        warn!(
            state_index = ?self.state_index(),
            previous,
            leader = self.current_leader(),
            stage = %self.stage,
            "Leader rotated"
        );
        self.enter_starting_stage();
    }

    fn check_processor(&mut self) {
        let Some(hash) = self.program_hash else {
            self.processor_ready = true;
            return;
        };
        self.processor_ready = self.runner.registry().is_loaded(&hash);
        if self.processor_ready {
            return;
        }
        let committee = self.committee.clone();
        self.runner.load_processor_async(hash, move || {
            committee.post_event(CommitteeEvent::ProcessorReady(hash));
        });
    }

    pub fn event_processor_ready(&mut self, hash: Hash256) {
        if self.program_hash == Some(hash) {
            debug!(program = %hash, "Processor ready");
            self.processor_ready = true;
            self.try_start_batch();
        }
    }

    fn request_balances(&mut self) {
        self.node_conn.request_balances(self.committee.address());
        self.next_balances_request = Instant::now() + self.config.balances_retry_period;
    }

    pub fn event_balances(&mut self, balances: Balances) {
        trace!(colors = balances.len(), "Balances");
        self.balances = Some(balances);
        self.try_start_batch();
    }

    // ----- backlog -------------------------------------------------------

    pub fn event_request(&mut self, msg: RequestMsg) {
        let id = msg.id();
        let Some(block) = msg.tx.requests.get(msg.index as usize) else {
            warn!(request = %id.short(), "Request index out of range");
            return;
        };
        if block.target != *self.committee.address() {
            debug!(request = %id.short(), "Request for another contract");
            return;
        }
        if self.is_processed(&id) {
            debug!(request = %id.short(), "Request already processed");
            return;
        }
        let code = block.code;
        if !self.backlog.add_request(id, msg.tx) {
            return;
        }
        debug!(request = %id.short(), code, "Request added to backlog");
        if self.state.is_none() {
            return;
        }
        if self.i_am_leader() {
            self.try_start_batch();
        } else {
            self.send_notification(vec![id]);
        }
    }

    pub fn event_notify_requests(&mut self, msg: NotifyReqMsg) {
        let Some(current) = self.state_index() else {
            self.backlog.store_future_notification(msg);
            return;
        };
        if msg.state_index > current {
            self.backlog.store_future_notification(msg);
            return;
        }
        if msg.state_index < current {
            trace!(from = msg.sender_index, state_index = msg.state_index, "Outdated notification");
            return;
        }
        self.backlog.mark_notified(msg.sender_index, &msg.request_ids, Instant::now());
        self.try_start_batch();
    }

    fn notify_leader(&mut self) {
        let ids = self.backlog.known_ids();
        self.next_renotify = Instant::now() + self.config.renotify_period;
        if !ids.is_empty() {
            self.send_notification(ids);
        }
    }

    fn send_notification(&self, request_ids: Vec<RequestId>) {
        let Some(state_index) = self.state_index() else {
            return;
        };
        let leader = self.current_leader();
        if leader == self.own_index() {
            return;
        }
        let count = request_ids.len();
        for msg in notify_requests_chunked(self.own_index(), state_index, &request_ids) {
            if let Err(e) = self.committee.send_msg(leader, &msg) {
                debug!(leader, error = %e, "Could not notify leader");
                return;
            }
        }
        trace!(leader, count, "Notified leader");
    }

    // ----- leader --------------------------------------------------------

    fn try_start_batch(&mut self) {
        if self.stage != Stage::LeaderStarting || self.leader_status.is_some() || !self.processor_ready {
            return;
        }
        if !self.state_synced {
            trace!(state_index = ?self.state_index(), "Not synced, holding batch");
            return;
        }
        let (Some(state), Some(balances)) = (self.state.as_ref(), self.balances.as_ref()) else {
            return;
        };
        let state_index = state.state_index();
        let timestamp = time::now_nanos().max(state.timestamp() + 1);
        let selected: Vec<RequestEntry> = self
            .backlog
            .select_batch(self.committee.quorum(), timestamp, self.config.max_batch_size)
            .into_iter()
            .filter(|e| !self.is_processed(&e.id))
            .collect();
        if selected.is_empty() {
            return;
        }
        let request_ids: Vec<RequestId> = selected.iter().map(|e| e.id).collect();
        let msg = CommitteeMsg::StartProcessingBatch(StartProcessingBatchMsg {
            sender_index: self.own_index(),
            timestamp,
            state_index,
            request_ids: request_ids.clone(),
            balances_hash: balances_hash(balances),
        });
        let reached = self.committee.send_msg_to_committee_peers(&msg, timestamp);
        if reached + 1 < self.committee.quorum() {
            debug!(reached, quorum = self.committee.quorum(), "Not enough peers for a batch");
            return;
        }

        let requests: Vec<RequestRef> = selected
            .into_iter()
            .filter_map(|e| e.tx.map(|tx| RequestRef::new(tx, e.id.index)))
            .collect();
        let Some(task) = self.make_task(self.own_index(), requests, timestamp) else {
            return;
        };
        let batch_hash = task.batch_hash();
        info!(
            state_index,
            requests = request_ids.len(),
            batch = %batch_hash,
            reached,
            "Starting batch as leader"
        );
        self.leader_status = Some(LeaderStatus::new(batch_hash, timestamp));
        self.set_stage(Stage::LeaderProcessingStarted);
        self.run_task(task);
    }

    fn make_task(&self, leader: u16, requests: Vec<RequestRef>, timestamp: i64) -> Option<VmTask> {
        let state = self.state.as_ref()?;
        let state_tx = self.state_tx.as_ref()?;
        let balances = self.balances.clone()?;
        let minimum_reward = match state.get_i64(vars::VAR_MINIMUM_REWARD) {
            Ok(v) => v.unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Minimum reward variable is corrupted");
                0
            }
        };
        let entropy = digest(&(&state_tx.signature, state_tx.id()));
        let owner = *self.committee.owner_address();
        let reward = self.config.reward_address.unwrap_or(owner);
        Some(VmTask::new(
            leader,
            self.program_hash,
            *self.committee.address(),
            *self.committee.color(),
            owner,
            reward,
            minimum_reward,
            entropy,
            balances,
            requests,
            timestamp,
            state.clone(),
        ))
    }

    fn run_task(&self, task: VmTask) {
        let committee = self.committee.clone();
        self.runner.run_task_async(task, move |task| {
            committee.post_event(CommitteeEvent::ResultCalculated(Box::new(task)));
        });
    }

    pub fn event_signed_hash(&mut self, msg: SignedHashMsg) {
        if !self.stage.is_leader() || self.state_index() != Some(msg.state_index) {
            debug!(from = msg.sender_index, state_index = msg.state_index, "Unexpected signed hash");
            return;
        }
        let Some(ls) = self.leader_status.as_mut() else {
            return;
        };
        if ls.finalized {
            return;
        }
        if let Err(e) = self.signer.verify_share(&msg.essence_hash, &msg.sig_share) {
            warn!(from = msg.sender_index, error = %e, "Invalid signature share");
            return;
        }
        let signed = SignedResult {
            essence_hash: msg.essence_hash,
            sig_share: msg.sig_share,
        };
        if let Err(reason) = ls.record(msg.sender_index, &msg.batch_hash, msg.orig_timestamp, signed) {
            warn!(from = msg.sender_index, ?reason, "Signature share rejected");
            return;
        }
        trace!(from = msg.sender_index, shares = ls.share_count(), "Signature share accepted");
        self.check_quorum();
    }

    fn check_quorum(&mut self) {
        let quorum = self.committee.quorum() as usize;
        let Some(ls) = self.leader_status.as_mut() else {
            return;
        };
        if ls.finalized {
            return;
        }
        let Some(essence) = ls.own_essence_hash() else {
            return;
        };
        for peer in ls.mismatching_peers(&essence) {
            warn!(peer, essence = %essence, "Peer computed a different result");
        }
        let shares = ls.matching_shares(&essence);
        if shares.len() < quorum {
            return;
        }
        let signature = match self.signer.aggregate(&essence, &shares) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "Failed to aggregate signature shares");
                return;
            }
        };
        let Some(result) = ls.result.as_ref() else {
            return;
        };
        let mut tx = result.result_tx.clone();
        tx.signature = Some(signature);
        let txid = tx.id();
        let batch = result.result_batch.clone().with_state_txid(txid);
        let state_index = batch.state_index.saturating_sub(1);
        if let Err(e) = persist::save_pending_batch(&self.partition, &batch) {
            error!(state_index, txid = %txid, error = %e, "Failed to store finalized batch, not posting");
            return;
        }
        ls.finalized = true;

        self.node_conn.post_transaction(&tx);
        self.committee.post_event(CommitteeEvent::PendingBatch(batch));
        let msg = CommitteeMsg::NotifyFinalResultPosted(NotifyFinalResultPostedMsg {
            sender_index: self.own_index(),
            state_index,
            txid,
        });
        self.committee.send_msg_to_committee_peers(&msg, time::now_nanos());
        info!(state_index, txid = %txid, shares = shares.len(), "Result finalized and posted");

        self.posted_result_txid = Some(txid);
        self.next_inclusion_poll = Instant::now();
        self.set_stage(Stage::LeaderResultFinalized);
    }

    // ----- follower ------------------------------------------------------

    pub fn event_start_processing_batch(&mut self, msg: StartProcessingBatchMsg) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        if msg.state_index != state.state_index() {
            debug!(from = msg.sender_index, state_index = msg.state_index, "Batch for another state index");
            return;
        }
        if self.stage != Stage::SubStarting {
            debug!(from = msg.sender_index, stage = %self.stage, "Batch announcement ignored in this stage");
            return;
        }
        if msg.sender_index != self.current_leader() {
            warn!(from = msg.sender_index, leader = self.current_leader(), "Batch announced by a peer that is not the leader");
            return;
        }
        if msg.timestamp <= state.timestamp() {
            warn!(from = msg.sender_index, "Batch timestamp does not advance the state");
            return;
        }
        if time::skew(msg.timestamp, time::now_nanos()) > self.config.clock_tolerance {
            warn!(from = msg.sender_index, "Batch timestamp outside clock tolerance");
            return;
        }
        match self.balances.as_ref().map(|b| balances_hash(b) == msg.balances_hash) {
            Some(true) => {}
            Some(false) => {
                warn!(from = msg.sender_index, "Balances differ from the leader's");
                self.request_balances();
                return;
            }
            None => {
                debug!(from = msg.sender_index, "No balances yet, cannot follow batch");
                return;
            }
        }
        let mut requests = Vec::with_capacity(msg.request_ids.len());
        for id in &msg.request_ids {
            match self.backlog.get(id).and_then(|e| e.tx.clone()) {
                Some(tx) => requests.push(RequestRef::new(tx, id.index)),
                None => {
                    debug!(request = %id.short(), "Batch contains a request not held locally");
                    return;
                }
            }
        }
        let Some(task) = self.make_task(msg.sender_index, requests, msg.timestamp) else {
            return;
        };
        let batch_hash = task.batch_hash();
        debug!(leader = msg.sender_index, batch = %batch_hash, requests = msg.request_ids.len(), "Following batch");
        self.follower_batch_hash = Some(batch_hash);
        self.set_stage(Stage::SubProcessingStarted);
        self.run_task(task);
    }

    pub fn event_notify_final_result_posted(&mut self, msg: NotifyFinalResultPostedMsg) {
        if self.state_index() != Some(msg.state_index) || self.stage.is_leader() {
            return;
        }
        if msg.sender_index != self.current_leader() {
            debug!(from = msg.sender_index, "Final result notice from a non-leader");
        }
        debug!(txid = %msg.txid, "Leader posted the result");
        self.posted_result_txid = Some(msg.txid);
        self.next_inclusion_poll = Instant::now();
        self.set_stage(Stage::SubResultFinalized);
    }

    // ----- executor ------------------------------------------------------

    pub fn event_result_calculated(&mut self, mut task: VmTask) {
        if self.state_index() != Some(task.state_index()) {
            debug!(state_index = task.state_index(), "Dropping result for an old state");
            return;
        }
        let batch_hash = task.batch_hash();
        let Some(result) = task.take_result() else {
            warn!(batch = %batch_hash, "Task finished without a result");
            return;
        };
        let essence = result.result_tx.essence_hash();

        if self.stage == Stage::LeaderProcessingStarted {
            let own = self.own_index();
            let share = self.signer.sign_share(&essence);
            let Some(ls) = self.leader_status.as_mut() else {
                return;
            };
            if ls.batch_hash != batch_hash {
                debug!(batch = %batch_hash, "Dropping result of a previous round");
                return;
            }
            ls.result = Some(result);
            let signed = SignedResult {
                essence_hash: essence,
                sig_share: share,
            };
            if let Err(reason) = ls.record(own, &batch_hash, task.timestamp, signed) {
                warn!(?reason, "Own signature share not recorded");
            }
            debug!(essence = %essence, "Leader computed the batch");
            self.set_stage(Stage::LeaderCalculationsFinished);
            self.check_quorum();
            return;
        }

        if self.stage != Stage::SubProcessingStarted || self.follower_batch_hash != Some(batch_hash) {
            debug!(batch = %batch_hash, stage = %self.stage, "Dropping stale result");
            return;
        }
        let msg = CommitteeMsg::SignedHash(SignedHashMsg {
            sender_index: self.own_index(),
            timestamp: time::now_nanos(),
            state_index: task.state_index(),
            batch_hash,
            orig_timestamp: task.timestamp,
            essence_hash: essence,
            sig_share: self.signer.sign_share(&essence),
        });
        if let Err(e) = self.committee.send_msg(task.leader_index, &msg) {
            debug!(leader = task.leader_index, error = %e, "Could not send signature share");
        }
        let txid = result.result_tx.id();
        let batch = result.result_batch.with_state_txid(txid);
        if let Err(e) = persist::save_pending_batch(&self.partition, &batch) {
            warn!(txid = %txid, error = %e, "Failed to store computed batch");
        }
        self.committee.post_event(CommitteeEvent::PendingBatch(batch));
        debug!(essence = %essence, leader = task.leader_index, "Signed batch result");
        self.set_stage(Stage::SubResultCalculated);
    }

    // ----- ledger --------------------------------------------------------

    pub fn event_inclusion_level(&mut self, txid: TxId, level: InclusionLevel) {
        if self.posted_result_txid != Some(txid) {
            return;
        }
        match level {
            InclusionLevel::Rejected => {
                warn!(txid = %txid, "Result transaction rejected by the ledger");
                self.rotate_leader();
            }
            InclusionLevel::Confirmed => {
                debug!(txid = %txid, "Result transaction confirmed");
                self.posted_result_txid = None;
            }
            InclusionLevel::Booked | InclusionLevel::Unknown => {
                trace!(txid = %txid, ?level, "Result transaction pending");
            }
        }
    }

    pub fn event_timer(&mut self, tick: u64) {
        if self.state.is_none() {
            return;
        }
        let now = Instant::now();

        if self.balances.is_none() && now >= self.next_balances_request {
            self.request_balances();
        }
        if let Some(txid) = self.posted_result_txid {
            if now >= self.next_inclusion_poll {
                self.node_conn.request_inclusion_level(&txid, self.committee.address());
                self.next_inclusion_poll = now + self.config.inclusion_poll_period;
            }
        }
        let pruned = self.backlog.prune_unknown(now, self.config.notified_request_ttl);
        if pruned > 0 {
            debug!(pruned, "Dropped notified requests that never arrived");
        }
        if self.stage == Stage::SubStarting && now >= self.next_renotify {
            self.notify_leader();
        }
        self.try_start_batch();

        if now < self.stage_deadline {
            return;
        }
        if self.stage.is_starting() && !self.backlog.has_work() {
            self.stage_deadline = now + self.stage.timeout(&self.config);
            return;
        }
        debug!(tick, stage = %self.stage, "Stage deadline passed");
        self.rotate_leader();
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("stage", &self.stage)
            .field("state_index", &self.state_index())
            .field("leader", &self.current_leader())
            .field("backlog", &self.backlog.len())
            .finish()
    }
}
