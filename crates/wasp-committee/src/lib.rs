//! Per-contract committee for rs-wasp.
//!
//! A committee is the fixed group of N nodes that runs one smart contract.
//! Each node holds one share of a T-of-N key. This crate provides:
//!
//! - [`Committee`] and [`CommitteeImpl`]: membership, peer addressing and the
//!   serialized event queue every input goes through
//! - [`StateManager`]: solid state, batch candidates and catching up with peers
//! - [`Operator`]: the round protocol that agrees on a batch, computes it and
//!   collects T signature shares over the result
//! - [`CommitteeMsg`]: the committee-scoped peer messages
//!
//! The ledger is reached through [`NodeConnection`]; peers through
//! [`wasp_peering::PeerNetwork`].

mod bootup;
mod committee;
mod committee_impl;
mod config;
mod consensus;
mod dispatch;
mod error;
mod events;
pub mod messages;
mod node_conn;
mod statemgr;

pub use bootup::BootupData;
pub use committee::{Committee, PeerStatus, RequestProcessingStatus};
pub use committee_impl::{CommitteeImpl, CommitteeParams, CommitteeStats, CommitteeStatus};
pub use config::{CommitteeConfig, ConsensusConfig, StateSyncConfig};
pub use consensus::{Operator, Stage};
pub use error::CommitteeError;
pub use events::{CommitteeEvent, InclusionLevel, RequestMsg, StateTransitionMsg};
pub use messages::CommitteeMsg;
pub use node_conn::NodeConnection;
pub use statemgr::StateManager;

/// Result type for committee operations.
pub type Result<T> = std::result::Result<T, CommitteeError>;
