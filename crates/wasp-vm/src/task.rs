use crate::{Result, VmError};
use std::sync::Arc;
use wasp_common::{digest, Address, Color, Hash256, RequestId};
use wasp_state::{Balances, Batch, RequestBlock, ScTransaction, VirtualState};

/// A request inside the transaction that carried it.
#[derive(Debug, Clone)]
pub struct RequestRef {
    pub tx: Arc<ScTransaction>,
    pub index: u16,
}

impl RequestRef {
    pub fn new(tx: Arc<ScTransaction>, index: u16) -> Self {
        Self { tx, index }
    }

    pub fn id(&self) -> RequestId {
        RequestId::new(self.tx.id(), self.index)
    }

    /// The request block. `None` if the index is out of range.
    pub fn block(&self) -> Option<&RequestBlock> {
        self.tx.requests.get(self.index as usize)
    }
}

/// Outputs of a finished task.
#[derive(Debug, Clone)]
pub struct VmResult {
    /// Result transaction, unsigned.
    pub result_tx: ScTransaction,
    /// Batch of state updates, one per request, in request order.
    pub result_batch: Batch,
}

/// One run of a batch through the VM.
///
/// The inputs are fixed at construction. The result is written exactly
/// once by the runner and then read by the consensus operator.
#[derive(Debug, Clone)]
pub struct VmTask {
    pub leader_index: u16,
    pub program_hash: Option<Hash256>,
    pub address: Address,
    pub color: Color,
    pub owner_address: Address,
    pub reward_address: Address,
    pub minimum_reward: i64,
    pub entropy: Hash256,
    pub balances: Balances,
    pub requests: Vec<RequestRef>,
    pub timestamp: i64,
    pub virtual_state: VirtualState,
    result: Option<VmResult>,
}

impl VmTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        leader_index: u16,
        program_hash: Option<Hash256>,
        address: Address,
        color: Color,
        owner_address: Address,
        reward_address: Address,
        minimum_reward: i64,
        entropy: Hash256,
        balances: Balances,
        requests: Vec<RequestRef>,
        timestamp: i64,
        virtual_state: VirtualState,
    ) -> Self {
        Self {
            leader_index,
            program_hash,
            address,
            color,
            owner_address,
            reward_address,
            minimum_reward,
            entropy,
            balances,
            requests,
            timestamp,
            virtual_state,
            result: None,
        }
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        self.requests.iter().map(RequestRef::id).collect()
    }

    /// Hash identifying the batch this task computes.
    pub fn batch_hash(&self) -> Hash256 {
        batch_hash(&self.request_ids(), self.timestamp, self.leader_index)
    }

    pub fn state_index(&self) -> u32 {
        self.virtual_state.state_index()
    }

    pub fn result(&self) -> Option<&VmResult> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<VmResult> {
        self.result.take()
    }

    pub fn set_result(&mut self, result: VmResult) -> Result<()> {
        if self.result.is_some() {
            return Err(VmError::ResultAlreadySet);
        }
        self.result = Some(result);
        Ok(())
    }
}

/// Identity of a proposed batch: its request ids, timestamp and leader.
pub fn batch_hash(request_ids: &[RequestId], timestamp: i64, leader_index: u16) -> Hash256 {
    digest(&(request_ids, timestamp, leader_index))
}
