//! Replicated contract state for rs-wasp.
//!
//! This crate provides:
//!
//! - [`VirtualState`]: the key/value state of one contract at one state index
//! - [`StateUpdate`] and [`Batch`]: the unit of change produced per request and per round
//! - [`ScTransaction`]: the ledger transaction carrying the state commitment and requests
//! - [`origin`]: the deterministic origin batch and origin transaction
//! - [`persist`]: storing solid state, batches and processed request markers
//!
//! A virtual state only moves forward by applying a batch whose index is
//! exactly one above its own.

mod balances;
mod batch;
mod error;
pub mod origin;
pub mod persist;
mod sctransaction;
mod state_update;
pub mod vars;
mod virtual_state;

pub use balances::{balances_hash, Balances};
pub use batch::Batch;
pub use error::StateError;
pub use sctransaction::{RequestBlock, ScTransaction, StateBlock};
pub use state_update::{Mutation, StateUpdate};
pub use virtual_state::VirtualState;

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
