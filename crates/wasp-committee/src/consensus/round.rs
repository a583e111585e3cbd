//! Leader-side bookkeeping for one round.

use std::collections::BTreeMap;
use wasp_common::Hash256;
use wasp_crypto::SigShare;
use wasp_vm::VmResult;

/// A peer's signature share and the digest it signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SignedResult {
    pub essence_hash: Hash256,
    pub sig_share: SigShare,
}

/// Why a share was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShareRejection {
    WrongBatch,
    WrongTimestamp,
    SenderMismatch,
    Duplicate,
}

#[derive(Debug)]
pub(crate) struct LeaderStatus {
    pub batch_hash: Hash256,
    pub timestamp: i64,
    /// Own computation, once finished.
    pub result: Option<VmResult>,
    pub finalized: bool,
    signed_results: BTreeMap<u16, SignedResult>,
}

impl LeaderStatus {
    pub fn new(batch_hash: Hash256, timestamp: i64) -> Self {
        Self {
            batch_hash,
            timestamp,
            result: None,
            finalized: false,
            signed_results: BTreeMap::new(),
        }
    }

    pub fn own_essence_hash(&self) -> Option<Hash256> {
        self.result.as_ref().map(|r| r.result_tx.essence_hash())
    }

    /// Record `peer`'s share for this round's batch. The share itself must
    /// already be verified against `essence_hash`.
    pub fn record(
        &mut self,
        peer: u16,
        batch_hash: &Hash256,
        orig_timestamp: i64,
        signed: SignedResult,
    ) -> Result<(), ShareRejection> {
        if *batch_hash != self.batch_hash {
            return Err(ShareRejection::WrongBatch);
        }
        if orig_timestamp != self.timestamp {
            return Err(ShareRejection::WrongTimestamp);
        }
        if signed.sig_share.index != peer {
            return Err(ShareRejection::SenderMismatch);
        }
        if self.signed_results.contains_key(&peer) {
            return Err(ShareRejection::Duplicate);
        }
        self.signed_results.insert(peer, signed);
        Ok(())
    }

    /// Shares over `essence_hash`, in peer order.
    pub fn matching_shares(&self, essence_hash: &Hash256) -> Vec<SigShare> {
        self.signed_results
            .values()
            .filter(|s| s.essence_hash == *essence_hash)
            .map(|s| s.sig_share)
            .collect()
    }

    /// Peers whose share signs something other than `essence_hash`.
    pub fn mismatching_peers(&self, essence_hash: &Hash256) -> Vec<u16> {
        self.signed_results
            .iter()
            .filter(|(_, s)| s.essence_hash != *essence_hash)
            .map(|(peer, _)| *peer)
            .collect()
    }

    pub fn share_count(&self) -> usize {
        self.signed_results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_crypto::Signature;

    fn share(index: u16) -> SigShare {
        SigShare {
            index,
            signature: Signature([index as u8; 64]),
        }
    }

    fn status() -> LeaderStatus {
        LeaderStatus::new(Hash256::hash(b"batch"), 1000)
    }

    fn signed(essence: &[u8], index: u16) -> SignedResult {
        SignedResult {
            essence_hash: Hash256::hash(essence),
            sig_share: share(index),
        }
    }

    #[test]
    fn test_record_checks_round_identity() {
        let mut ls = status();
        let batch = Hash256::hash(b"batch");
        let stale = Hash256::hash(b"previous round");
        assert_eq!(ls.record(1, &stale, 1000, signed(b"e", 1)), Err(ShareRejection::WrongBatch));
        assert_eq!(ls.record(1, &batch, 999, signed(b"e", 1)), Err(ShareRejection::WrongTimestamp));
        assert_eq!(ls.record(2, &batch, 1000, signed(b"e", 1)), Err(ShareRejection::SenderMismatch));
        assert_eq!(ls.record(1, &batch, 1000, signed(b"e", 1)), Ok(()));
        assert_eq!(ls.record(1, &batch, 1000, signed(b"e", 1)), Err(ShareRejection::Duplicate));
        assert_eq!(ls.share_count(), 1);
    }

    #[test]
    fn test_matching_shares_by_digest() {
        let mut ls = status();
        let batch = Hash256::hash(b"batch");
        ls.record(0, &batch, 1000, signed(b"e", 0)).unwrap();
        ls.record(1, &batch, 1000, signed(b"other", 1)).unwrap();
        ls.record(3, &batch, 1000, signed(b"e", 3)).unwrap();

        let good = Hash256::hash(b"e");
        let shares = ls.matching_shares(&good);
        assert_eq!(shares.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(ls.mismatching_peers(&good), vec![1]);
    }
}
