//! Everything that can enter a committee's queue.

use crate::messages::CommitteeMsg;
use std::sync::Arc;
use wasp_common::{Hash256, RequestId, TxId};
use wasp_state::{Balances, Batch, ScTransaction, VirtualState};
use wasp_vm::VmTask;

/// Ledger's view of a posted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionLevel {
    Unknown,
    /// Seen by the ledger, not yet final.
    Booked,
    Confirmed,
    Rejected,
}

/// A request addressed to this contract, as delivered by the ledger.
#[derive(Debug, Clone)]
pub struct RequestMsg {
    pub tx: Arc<ScTransaction>,
    pub index: u16,
}

impl RequestMsg {
    pub fn id(&self) -> RequestId {
        RequestId::new(self.tx.id(), self.index)
    }
}

/// The solid state moved to a new index.
#[derive(Debug, Clone)]
pub struct StateTransitionMsg {
    pub state: VirtualState,
    /// Ledger transaction that approved `state`.
    pub state_tx: Arc<ScTransaction>,
    /// Requests processed by the batch that produced `state`.
    pub request_ids: Vec<RequestId>,
}

/// One item of work for a committee.
#[derive(Debug)]
pub enum CommitteeEvent {
    /// Decoded peer message. Sender index and envelope timestamp are already stamped.
    Peer(CommitteeMsg),
    /// Ledger-confirmed transaction carrying a state commitment for this contract.
    StateTransaction(Arc<ScTransaction>),
    InclusionLevel { txid: TxId, level: InclusionLevel },
    Balances(Balances),
    Request(RequestMsg),
    /// Batch computed locally, candidate for the next state.
    PendingBatch(Batch),
    StateTransition(StateTransitionMsg),
    ProcessorReady(Hash256),
    ResultCalculated(Box<VmTask>),
    /// Even ticks belong to the state manager, odd ticks to the operator.
    Timer(u64),
}

impl CommitteeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Peer(_) => "peer",
            Self::StateTransaction(_) => "state_transaction",
            Self::InclusionLevel { .. } => "inclusion_level",
            Self::Balances(_) => "balances",
            Self::Request(_) => "request",
            Self::PendingBatch(_) => "pending_batch",
            Self::StateTransition(_) => "state_transition",
            Self::ProcessorReady(_) => "processor_ready",
            Self::ResultCalculated(_) => "result_calculated",
            Self::Timer(_) => "timer",
        }
    }
}
