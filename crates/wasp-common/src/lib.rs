//! Common types shared by every rs-wasp crate.
//!
//! This crate holds the small vocabulary the rest of the node speaks:
//!
//! - [`Hash256`]: SHA-256 digests used for ids, state hashes and batch hashes
//! - [`Address`], [`Color`], [`TxId`], [`RequestId`]: ledger-level identifiers
//! - [`codec`]: bincode encoding of payloads and store records
//! - [`Permutation16`]: the seeded peer ordering used for leader rotation
//! - [`time`]: wall-clock helpers in unix nanoseconds

pub mod codec;
pub mod hash;
pub mod permutation;
pub mod time;
pub mod types;

pub use codec::{digest, CodecError, Decodable, Encodable};
pub use hash::Hash256;
pub use permutation::{valid_permutation, Permutation16};
pub use types::{Address, Color, RequestId, TxId};
