use crate::state_update::StateUpdate;
use serde::{Deserialize, Serialize};
use wasp_common::{digest, Hash256, RequestId, TxId};

/// The state updates of one consensus round, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub state_index: u32,
    pub timestamp: i64,
    pub updates: Vec<StateUpdate>,
    /// Ledger transaction committing to the state this batch produces.
    /// Zero until the batch is approved.
    pub state_txid: TxId,
}

impl Batch {
    pub fn new(state_index: u32, timestamp: i64, updates: Vec<StateUpdate>) -> Self {
        Self {
            state_index,
            timestamp,
            updates,
            state_txid: TxId::ZERO,
        }
    }

    pub fn with_state_txid(mut self, txid: TxId) -> Self {
        self.state_txid = txid;
        self
    }

    pub fn size(&self) -> usize {
        self.updates.len()
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        self.updates.iter().map(|u| u.request_id).collect()
    }

    /// Digest over index, timestamp and updates. Excludes the state txid.
    pub fn essence_hash(&self) -> Hash256 {
        digest(&(self.state_index, self.timestamp, &self.updates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::{Decodable, Encodable};

    fn sample() -> Batch {
        let mut su = StateUpdate::new(RequestId::new(Hash256::hash(b"r1"), 0));
        su.set("counter", 1i64.to_le_bytes().to_vec());
        Batch::new(4, 1_000, vec![su, StateUpdate::new(RequestId::new(Hash256::hash(b"r2"), 1))])
    }

    #[test]
    fn test_essence_excludes_txid() {
        let b = sample();
        let approved = b.clone().with_state_txid(Hash256::hash(b"tx"));
        assert_eq!(b.essence_hash(), approved.essence_hash());
        assert_ne!(b.to_bytes().unwrap(), approved.to_bytes().unwrap());
    }

    #[test]
    fn test_essence_depends_on_timestamp() {
        let a = sample();
        let mut b = sample();
        b.timestamp += 1;
        assert_ne!(a.essence_hash(), b.essence_hash());
    }

    #[test]
    fn test_decode_full_batch() {
        let b = sample().with_state_txid(Hash256::hash(b"tx"));
        let decoded = Batch::from_bytes(&b.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, b);
        assert_eq!(decoded.size(), 2);
        assert_eq!(decoded.request_ids()[1].index, 1);
    }
}
