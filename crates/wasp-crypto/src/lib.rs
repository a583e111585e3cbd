//! Cryptography for rs-wasp committees.
//!
//! - [`keys`]: ed25519 key pairs and signatures
//! - [`dkshare`]: a node's share of a committee key plus the public key set
//! - [`threshold`]: the [`ThresholdSigner`] capability used by consensus
//!
//! The committee key is a T-of-N scheme. Each member signs a digest with its
//! own share; any T verified shares over the same digest aggregate into a
//! [`JointSignature`] that verifies against the committee's public key set.

pub mod dkshare;
mod error;
pub mod keys;
pub mod threshold;

pub use dkshare::{DkShare, DkShareRecord, PublicKeySet};
pub use error::CryptoError;
pub use keys::{PublicKey, SecretKey, Signature};
pub use threshold::{JointSignature, SigShare, ThresholdSigner};

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
