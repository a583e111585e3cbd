//! The threshold signing capability consumed by the consensus operator.

use crate::keys::Signature;
use crate::Result;
use serde::{Deserialize, Serialize};
use wasp_common::Hash256;

/// One member's partial signature over a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigShare {
    /// Peer index of the signer.
    pub index: u16,
    pub signature: Signature,
}

/// Aggregate of at least T shares from distinct members over the same digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointSignature {
    /// Shares sorted by signer index, no duplicates.
    pub shares: Vec<SigShare>,
}

/// Signing with this node's share of a T-of-N committee key.
///
/// `sign_share` and `verify_share` are cheap and synchronous. `aggregate`
/// succeeds only when at least `t()` shares from distinct members verify
/// against `digest`; invalid or duplicate shares are skipped.
pub trait ThresholdSigner: Send + Sync {
    /// This node's peer index.
    fn index(&self) -> u16;

    /// Committee size.
    fn n(&self) -> u16;

    /// Quorum threshold.
    fn t(&self) -> u16;

    fn sign_share(&self, digest: &Hash256) -> SigShare;

    fn verify_share(&self, digest: &Hash256, share: &SigShare) -> Result<()>;

    fn aggregate(&self, digest: &Hash256, shares: &[SigShare]) -> Result<JointSignature>;

    fn verify_joint(&self, digest: &Hash256, signature: &JointSignature) -> Result<()>;
}
