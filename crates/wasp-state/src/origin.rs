//! The origin of a contract chain.
//!
//! Every node rebuilds the origin batch locally from the contract address,
//! so it never travels between peers. The origin transaction commits to the
//! resulting state at index 0 and carries the init request that installs
//! the program hash. The contract's color is the origin transaction id.

use crate::batch::Batch;
use crate::sctransaction::{RequestBlock, ScTransaction, StateBlock};
use crate::state_update::StateUpdate;
use crate::vars;
use crate::virtual_state::VirtualState;
use wasp_common::{Address, Hash256, RequestId};

/// Parameters the owner chooses when creating a contract.
#[derive(Debug, Clone)]
pub struct OriginParams {
    pub address: Address,
    pub owner: Address,
    pub program_hash: Hash256,
    pub description: String,
    pub minimum_reward: i64,
}

/// Batch producing the state at index 0.
pub fn origin_batch(address: &Address) -> Batch {
    let mut update = StateUpdate::new(RequestId::new(Hash256::ZERO, 0));
    update.set(vars::VAR_ADDRESS, address.as_bytes().to_vec());
    Batch::new(0, 0, vec![update])
}

pub fn origin_state(address: &Address) -> VirtualState {
    let mut state = VirtualState::new();
    // An empty state always accepts an index 0 batch.
    let _ = state.apply_batch(&origin_batch(address));
    state
}

/// Transaction creating a contract chain.
pub fn create_origin_transaction(params: &OriginParams) -> ScTransaction {
    let state = origin_state(&params.address);
    let init = RequestBlock::new(params.address, params.owner, vars::REQ_INIT)
        .with_arg(vars::ARG_PROGRAM_HASH, params.program_hash.as_bytes().to_vec())
        .with_arg(vars::ARG_DESCRIPTION, params.description.as_bytes().to_vec())
        .with_arg(
            vars::ARG_MINIMUM_REWARD,
            params.minimum_reward.to_le_bytes().to_vec(),
        );
    ScTransaction {
        state_block: Some(StateBlock {
            address: params.address,
            color: Hash256::ZERO,
            state_index: 0,
            timestamp: state.timestamp(),
            state_hash: state.hash(),
        }),
        requests: vec![init],
        signature: None,
    }
}
