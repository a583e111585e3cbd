//! The committee actor.
//!
//! [`CommitteeImpl`] is the shared handle: it validates and enqueues events
//! and sends messages through the peer network. The state manager and the
//! operator live inside a single tokio task that drains the queues, so only
//! one event is interpreted at a time and neither needs locking.
//!
//! Events from outside go through a bounded queue and are dropped when it is
//! full or the committee is not open yet. Events the committee generates for
//! itself (VM results, state transitions, pending batches) use an unbounded
//! channel that is always drained first.

use crate::bootup::BootupData;
use crate::committee::{Committee, PeerStatus, RequestProcessingStatus};
use crate::config::CommitteeConfig;
use crate::consensus::{Operator, Stage};
use crate::events::CommitteeEvent;
use crate::messages::{CommitteeMsg, TestTraceMsg};
use crate::node_conn::NodeConnection;
use crate::statemgr::StateManager;
use crate::{CommitteeError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, trace, warn, Instrument};
use wasp_common::{time, Address, Color, Permutation16, RequestId};
use wasp_crypto::ThresholdSigner;
use wasp_db::Partition;
use wasp_peering::{PeerMessage, PeerNetwork};
use wasp_state::persist;
use wasp_vm::VmRunner;

/// Everything needed to bring up one committee.
pub struct CommitteeParams {
    pub bootup: BootupData,
    pub signer: Arc<dyn ThresholdSigner>,
    pub network: Arc<dyn PeerNetwork>,
    pub node_conn: Arc<dyn NodeConnection>,
    pub runner: VmRunner,
    pub partition: Partition,
    pub config: CommitteeConfig,
}

/// Snapshot of the committee task, refreshed after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeStatus {
    pub solid_index: Option<u32>,
    pub largest_evidenced: u32,
    pub synced: bool,
    pub stage: Stage,
    pub leader: u16,
    pub backlog: usize,
}

impl Default for CommitteeStatus {
    fn default() -> Self {
        Self {
            solid_index: None,
            largest_evidenced: 0,
            synced: false,
            stage: Stage::NoSync,
            leader: 0,
            backlog: 0,
        }
    }
}

/// Queue counters.
#[derive(Debug, Default)]
pub struct CommitteeStats {
    pub events_received: AtomicU64,
    pub events_dropped: AtomicU64,
    pub messages_sent: AtomicU64,
    pub send_failures: AtomicU64,
}

pub struct CommitteeImpl {
    bootup: BootupData,
    own_index: u16,
    quorum: u16,
    network: Arc<dyn PeerNetwork>,
    node_conn: Arc<dyn NodeConnection>,
    partition: Partition,

    external_tx: mpsc::Sender<CommitteeEvent>,
    internal_tx: mpsc::UnboundedSender<CommitteeEvent>,
    shutdown_tx: broadcast::Sender<()>,

    ready_state_manager: AtomicBool,
    ready_consensus: AtomicBool,
    open: AtomicBool,
    dismissed: AtomicBool,

    backlog_mirror: Arc<RwLock<HashSet<RequestId>>>,
    status: RwLock<CommitteeStatus>,
    stats: CommitteeStats,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CommitteeImpl {
    /// Validate the bootup data, build both subsystems and start the task.
    pub fn start(params: CommitteeParams) -> Result<Arc<Self>> {
        let CommitteeParams {
            bootup,
            signer,
            network,
            node_conn,
            runner,
            partition,
            config,
        } = params;

        bootup.validate()?;
        let own_index = bootup.peer_index(network.my_location()).ok_or_else(|| {
            CommitteeError::InvalidBootupData(format!(
                "{} is not a member of the committee",
                network.my_location()
            ))
        })?;
        if signer.index() != own_index || signer.n() != bootup.size() {
            return Err(CommitteeError::InvalidBootupData(format!(
                "key share {}/{} does not match peer {}/{}",
                signer.index(),
                signer.n(),
                own_index,
                bootup.size()
            )));
        }

        let (external_tx, external_rx) = mpsc::channel(config.queue_size.max(1));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let committee = Arc::new(Self {
            quorum: signer.t(),
            own_index,
            bootup,
            network,
            node_conn,
            partition: partition.clone(),
            external_tx,
            internal_tx,
            shutdown_tx,
            ready_state_manager: AtomicBool::new(false),
            ready_consensus: AtomicBool::new(false),
            open: AtomicBool::new(false),
            dismissed: AtomicBool::new(false),
            backlog_mirror: Arc::new(RwLock::new(HashSet::new())),
            status: RwLock::new(CommitteeStatus::default()),
            stats: CommitteeStats::default(),
            task: Mutex::new(None),
        });

        for (i, location) in committee.bootup.committee_nodes.iter().enumerate() {
            if i as u16 != own_index {
                committee.network.use_peer(location);
            }
        }
        committee.node_conn.subscribe(committee.address());

        let as_dyn: Arc<dyn Committee> = committee.clone();
        let state_mgr = StateManager::new(
            as_dyn.clone(),
            committee.node_conn.clone(),
            partition.clone(),
            config.state_sync.clone(),
        );
        let operator = Operator::new(
            as_dyn,
            signer,
            committee.node_conn.clone(),
            runner,
            partition,
            config.consensus.clone(),
            committee.backlog_mirror.clone(),
        );

        info!(
            address = %committee.address().short(),
            peer = own_index,
            size = committee.size(),
            quorum = committee.quorum,
            "Committee started"
        );

        let task = committee.clone();
        let span = info_span!("committee", address = %committee.address().short(), peer = own_index);
        let handle = tokio::spawn(
            async move {
                task.run_loop(
                    state_mgr,
                    operator,
                    external_rx,
                    internal_rx,
                    shutdown_rx,
                    config.timer_tick,
                )
                .await;
            }
            .instrument(span),
        );
        *committee.task.lock() = Some(handle);
        Ok(committee)
    }

    /// Wait for the committee task to exit after dismissal. Nothing the
    /// task was dispatching is still running once this returns.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(address = %self.address().short(), error = %e, "Committee task failed");
            }
        }
    }

    async fn run_loop(
        self: Arc<Self>,
        mut state_mgr: StateManager,
        mut operator: Operator,
        mut external_rx: mpsc::Receiver<CommitteeEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<CommitteeEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
        timer_tick: std::time::Duration,
    ) {
        let mut ticker = interval(timer_tick.max(std::time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick: u64 = 0;

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                Some(event) = internal_rx.recv() => event,
                Some(event) = external_rx.recv() => event,
                _ = ticker.tick() => {
                    tick = tick.wrapping_add(1);
                    CommitteeEvent::Timer(tick)
                }
            };
            if self.is_dismissed() {
                break;
            }
            self.dispatch(&mut state_mgr, &mut operator, event);
            self.refresh_status(&state_mgr, &operator);
        }
        debug!(address = %self.address().short(), "Committee task stopped");
    }

    fn refresh_status(&self, state_mgr: &StateManager, operator: &Operator) {
        let status = CommitteeStatus {
            solid_index: state_mgr.solid_index(),
            largest_evidenced: state_mgr.largest_evidenced(),
            synced: state_mgr.is_synced(),
            stage: operator.stage(),
            leader: operator.current_leader(),
            backlog: operator.backlog_len(),
        };
        let mut current = self.status.write();
        if *current != status {
            *current = status;
        }
    }

    pub fn status(&self) -> CommitteeStatus {
        self.status.read().clone()
    }

    pub fn stats(&self) -> &CommitteeStats {
        &self.stats
    }

    pub fn bootup(&self) -> &BootupData {
        &self.bootup
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    fn location(&self, index: u16) -> Option<&str> {
        self.bootup
            .committee_nodes
            .get(index as usize)
            .map(String::as_str)
    }

    /// Validate and decode a message from the peer network.
    ///
    /// The sender index must be a valid peer other than self, and the
    /// transport location it came from must be that peer's location.
    pub fn receive_peer_message(&self, from: &str, msg: PeerMessage) {
        if msg.address != *self.address() {
            return;
        }
        let sender = msg.sender_index;
        if sender >= self.size() || sender == self.own_index {
            warn!(from, sender, "Invalid sender index");
            return;
        }
        if self.location(sender) != Some(from) {
            warn!(from, sender, "Sender index does not match peer location");
            return;
        }
        match CommitteeMsg::decode(msg.msg_type, &msg.data, sender, msg.timestamp) {
            Ok(decoded) => self.receive_message(CommitteeEvent::Peer(decoded)),
            Err(e) => warn!(from, msg_type = msg.msg_type, error = %e, "Dropping undecodable message"),
        }
    }

    fn peer_message(&self, msg: &CommitteeMsg, timestamp: Option<i64>) -> Result<PeerMessage> {
        let mut pm = PeerMessage::committee(
            *self.address(),
            msg.msg_type(),
            self.own_index,
            msg.encode_payload()?,
        );
        if let Some(ts) = timestamp {
            pm.timestamp = ts;
        }
        Ok(pm)
    }

    fn send_to(&self, index: u16, pm: &PeerMessage) -> Result<()> {
        let location = self.location(index).ok_or(CommitteeError::PeerIndexOutOfRange {
            index,
            size: self.size(),
        })?;
        match self.network.send(location, pm) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    fn check_open(&self) {
        if self.ready_state_manager.load(Ordering::Acquire)
            && self.ready_consensus.load(Ordering::Acquire)
            && !self.is_dismissed()
            && !self.open.swap(true, Ordering::AcqRel)
        {
            info!(address = %self.address().short(), "Committee is open for messages");
        }
    }

    pub(crate) fn handle_test_trace(&self, msg: TestTraceMsg) {
        if msg.initiator_index == self.own_index {
            let elapsed = time::skew(time::now_nanos(), msg.initial_ts);
            info!(
                hops = msg.sequence.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Test trace completed"
            );
            return;
        }
        let Some(pos) = msg.sequence.iter().position(|p| *p == self.own_index) else {
            warn!(from = msg.sender_index, "Test trace sequence does not contain this peer");
            return;
        };
        self.forward_test_trace(msg.initiator_index, msg.initial_ts, msg.sequence, pos);
    }

    fn forward_test_trace(&self, initiator: u16, initial_ts: i64, sequence: Vec<u16>, pos: usize) {
        let next = sequence[(pos + 1) % sequence.len()];
        let msg = CommitteeMsg::TestTrace(TestTraceMsg {
            sender_index: self.own_index,
            initiator_index: initiator,
            initial_ts,
            sequence,
        });
        if next == self.own_index {
            self.handle_test_trace_loopback(initial_ts);
            return;
        }
        if let Err(e) = self.send_msg(next, &msg) {
            warn!(next, error = %e, "Test trace interrupted");
        } else {
            trace!(next, "Test trace forwarded");
        }
    }

    fn handle_test_trace_loopback(&self, initial_ts: i64) {
        info!(
            elapsed_ms = time::skew(time::now_nanos(), initial_ts).as_millis() as u64,
            "Test trace completed without peers"
        );
    }
}

impl Committee for CommitteeImpl {
    fn address(&self) -> &Address {
        &self.bootup.address
    }

    fn owner_address(&self) -> &Address {
        &self.bootup.owner_address
    }

    fn color(&self) -> &Color {
        &self.bootup.color
    }

    fn size(&self) -> u16 {
        self.bootup.size()
    }

    fn quorum(&self) -> u16 {
        self.quorum
    }

    fn own_peer_index(&self) -> u16 {
        self.own_index
    }

    fn num_peers(&self) -> u16 {
        self.size().saturating_sub(1)
    }

    fn send_msg(&self, target: u16, msg: &CommitteeMsg) -> Result<()> {
        if self.is_dismissed() {
            return Err(CommitteeError::Dismissed);
        }
        if target >= self.size() {
            return Err(CommitteeError::PeerIndexOutOfRange {
                index: target,
                size: self.size(),
            });
        }
        if target == self.own_index {
            return Err(CommitteeError::SendToSelf);
        }
        self.send_to(target, &self.peer_message(msg, None)?)
    }

    fn send_msg_to_committee_peers(&self, msg: &CommitteeMsg, ts: i64) -> u16 {
        if self.is_dismissed() {
            return 0;
        }
        let pm = match self.peer_message(msg, Some(ts)) {
            Ok(pm) => pm,
            Err(e) => {
                warn!(msg_type = msg.msg_type(), error = %e, "Could not encode broadcast");
                return 0;
            }
        };
        let mut reached = 0;
        for index in 0..self.size() {
            if index == self.own_index || !self.is_alive_peer(index) {
                continue;
            }
            match self.send_to(index, &pm) {
                Ok(()) => reached += 1,
                Err(e) => trace!(peer = index, error = %e, "Broadcast send failed"),
            }
        }
        reached
    }

    fn send_msg_in_sequence(&self, msg: &CommitteeMsg, start: u16, sequence: &[u16]) -> Result<u16> {
        if self.is_dismissed() {
            return Err(CommitteeError::Dismissed);
        }
        let len = sequence.len();
        if len == 0 {
            return Err(CommitteeError::NoPeerReachable);
        }
        let pm = self.peer_message(msg, None)?;
        for k in 0..len {
            let slot = (start as usize + k) % len;
            let peer = sequence[slot];
            if peer == self.own_index || !self.is_alive_peer(peer) {
                continue;
            }
            if self.send_to(peer, &pm).is_ok() {
                return Ok(slot as u16);
            }
        }
        Err(CommitteeError::NoPeerReachable)
    }

    fn is_alive_peer(&self, index: u16) -> bool {
        if index == self.own_index {
            return true;
        }
        self.location(index)
            .is_some_and(|location| self.network.is_alive(location))
    }

    fn receive_message(&self, event: CommitteeEvent) {
        if self.is_dismissed() || !self.open.load(Ordering::Acquire) {
            trace!(event = event.name(), "Committee not open, dropping event");
            return;
        }
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        match self.external_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event = event.name(), "Committee queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn post_event(&self, event: CommitteeEvent) {
        if self.is_dismissed() {
            trace!(event = event.name(), "Committee dismissed, dropping internal event");
            return;
        }
        let _ = self.internal_tx.send(event);
    }

    fn init_test_round(&self) {
        let seed = time::now_nanos().to_le_bytes();
        let sequence = Permutation16::new(self.size(), &seed).get_array().to_vec();
        let Some(pos) = sequence.iter().position(|p| *p == self.own_index) else {
            return;
        };
        info!(sequence = ?sequence, "Starting test trace");
        self.forward_test_trace(self.own_index, time::now_nanos(), sequence, pos);
    }

    fn peer_status(&self) -> Vec<PeerStatus> {
        self.bootup
            .committee_nodes
            .iter()
            .enumerate()
            .map(|(i, location)| {
                let index = i as u16;
                PeerStatus {
                    index,
                    peering_id: location.clone(),
                    is_self: index == self.own_index,
                    connected: self.is_alive_peer(index),
                }
            })
            .collect()
    }

    fn set_ready_state_manager(&self) {
        self.ready_state_manager.store(true, Ordering::Release);
        self.check_open();
    }

    fn set_ready_consensus(&self) {
        self.ready_consensus.store(true, Ordering::Release);
        self.check_open();
    }

    fn dismiss(&self) {
        if self.dismissed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.open.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        for (i, location) in self.bootup.committee_nodes.iter().enumerate() {
            if i as u16 != self.own_index {
                self.network.stop_using_peer(location);
            }
        }
        self.node_conn.unsubscribe(self.address());
        info!(address = %self.address().short(), "Committee dismissed");
    }

    fn is_dismissed(&self) -> bool {
        self.dismissed.load(Ordering::Acquire)
    }

    fn get_request_processing_status(&self, id: &RequestId) -> RequestProcessingStatus {
        if self.backlog_mirror.read().contains(id) {
            return RequestProcessingStatus::Backlog;
        }
        match persist::is_request_processed(&self.partition, id) {
            Ok(true) => RequestProcessingStatus::Completed,
            Ok(false) => RequestProcessingStatus::Unknown,
            Err(e) => {
                warn!(request = %id.short(), error = %e, "Failed to read request status");
                RequestProcessingStatus::Unknown
            }
        }
    }
}

impl Drop for CommitteeImpl {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl std::fmt::Debug for CommitteeImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitteeImpl")
            .field("address", &self.bootup.address)
            .field("own_index", &self.own_index)
            .field("size", &self.size())
            .field("dismissed", &self.is_dismissed())
            .finish()
    }
}
