//! Simulation harness for rs-wasp.
//!
//! Runs complete committees in one process over an in-memory network, for
//! scenario tests that need several nodes agreeing on a contract state.

pub mod cluster;
pub mod network;

pub use cluster::{Cluster, ClusterConfig};
pub use network::{LocalHub, LocalNetwork};
