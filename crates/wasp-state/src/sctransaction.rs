use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wasp_common::{digest, Address, Color, Hash256, TxId};
use wasp_crypto::JointSignature;

/// State commitment carried by a contract transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    pub address: Address,
    pub color: Color,
    pub state_index: u32,
    pub timestamp: i64,
    /// Hash of the virtual state after applying the batch.
    pub state_hash: Hash256,
}

/// A request to a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBlock {
    pub target: Address,
    pub sender: Address,
    pub code: u16,
    /// Unix seconds before which the request must not be processed. 0 means none.
    pub timelock: u32,
    /// Plain tokens attached to the request.
    pub deposit: i64,
    pub args: BTreeMap<String, Vec<u8>>,
}

impl RequestBlock {
    pub fn new(target: Address, sender: Address, code: u16) -> Self {
        Self {
            target,
            sender,
            code,
            timelock: 0,
            deposit: 0,
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    pub fn with_timelock(mut self, timelock: u32) -> Self {
        self.timelock = timelock;
        self
    }

    /// True if the request may not run at `unix_secs`.
    pub fn is_time_locked(&self, unix_secs: i64) -> bool {
        i64::from(self.timelock) > unix_secs
    }
}

/// A ledger transaction as seen by contracts: an optional state commitment,
/// zero or more requests, and the committee's joint signature.
///
/// The id covers the essence only, so every committee member knows it
/// before the signature is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScTransaction {
    pub state_block: Option<StateBlock>,
    pub requests: Vec<RequestBlock>,
    pub signature: Option<JointSignature>,
}

impl ScTransaction {
    pub fn essence_hash(&self) -> Hash256 {
        digest(&(&self.state_block, &self.requests))
    }

    pub fn id(&self) -> TxId {
        self.essence_hash()
    }

    pub fn state_index(&self) -> Option<u32> {
        self.state_block.as_ref().map(|sb| sb.state_index)
    }

    /// Indices of request blocks addressed to `target`.
    pub fn requests_to<'a>(&'a self, target: &'a Address) -> impl Iterator<Item = u16> + 'a {
        self.requests
            .iter()
            .enumerate()
            .filter(move |(_, r)| &r.target == target)
            .filter_map(|(i, _)| u16::try_from(i).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::{Decodable, Encodable};
    use wasp_crypto::DkShare;
    use wasp_crypto::ThresholdSigner;

    fn sample() -> ScTransaction {
        let contract = Address::from_key_material(b"sc");
        ScTransaction {
            state_block: Some(StateBlock {
                address: contract,
                color: Hash256::hash(b"color"),
                state_index: 3,
                timestamp: 42,
                state_hash: Hash256::hash(b"state"),
            }),
            requests: vec![
                RequestBlock::new(contract, contract, 1).with_arg("n", vec![1]),
                RequestBlock::new(Address::from_key_material(b"other"), contract, 2),
            ],
            signature: None,
        }
    }

    #[test]
    fn test_id_ignores_signature() {
        let tx = sample();
        let shares = DkShare::generate_committee_from_seed(1, 1, b"s").unwrap();
        let mut signed = tx.clone();
        signed.signature = Some(
            shares[0]
                .aggregate(&tx.essence_hash(), &[shares[0].sign_share(&tx.essence_hash())])
                .unwrap(),
        );
        assert_eq!(tx.id(), signed.id());

        let decoded = ScTransaction::from_bytes(&signed.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, signed);
    }

    #[test]
    fn test_requests_to_filters_by_target() {
        let tx = sample();
        let contract = Address::from_key_material(b"sc");
        let idx: Vec<u16> = tx.requests_to(&contract).collect();
        assert_eq!(idx, vec![0]);
        assert_eq!(tx.state_index(), Some(3));
    }

    #[test]
    fn test_time_lock() {
        let req = RequestBlock::new(Address::NIL, Address::NIL, 0).with_timelock(100);
        assert!(req.is_time_locked(99));
        assert!(!req.is_time_locked(100));
        assert!(!RequestBlock::new(Address::NIL, Address::NIL, 0).is_time_locked(0));
    }
}
