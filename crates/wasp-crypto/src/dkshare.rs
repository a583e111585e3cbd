//! Distributed key shares.
//!
//! A [`DkShare`] is one member's slice of a committee key: its own secret
//! share plus the [`PublicKeySet`] every member holds. The committee address
//! is derived from the public key set, so all members agree on it.

use crate::error::CryptoError;
use crate::keys::{PublicKey, SecretKey};
use crate::threshold::{JointSignature, SigShare, ThresholdSigner};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;
use wasp_common::{Address, Hash256};

/// Public part of a committee key, identical on every member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeySet {
    n: u16,
    t: u16,
    pub_shares: Vec<PublicKey>,
}

impl PublicKeySet {
    pub fn new(t: u16, pub_shares: Vec<PublicKey>) -> Result<Self> {
        let n = pub_shares.len() as u16;
        if t == 0 || t > n {
            return Err(CryptoError::InvalidThreshold { t, n });
        }
        Ok(Self { n, t, pub_shares })
    }

    pub fn n(&self) -> u16 {
        self.n
    }

    pub fn t(&self) -> u16 {
        self.t
    }

    pub fn pub_share(&self, index: u16) -> Result<&PublicKey> {
        self.pub_shares
            .get(index as usize)
            .ok_or(CryptoError::ShareIndexOutOfRange { index, n: self.n })
    }

    /// Digest identifying the whole key set.
    pub fn master_hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(4 + 32 * self.pub_shares.len());
        data.extend_from_slice(&self.t.to_le_bytes());
        data.extend_from_slice(&self.n.to_le_bytes());
        for key in &self.pub_shares {
            data.extend_from_slice(key.as_bytes());
        }
        Hash256::hash(&data)
    }

    /// Address controlled by this key set.
    pub fn address(&self) -> Address {
        Address::from_bytes(self.master_hash().0)
    }

    pub fn verify_share(&self, digest: &Hash256, share: &SigShare) -> Result<()> {
        self.pub_share(share.index)?
            .verify(digest.as_bytes(), &share.signature)
    }

    /// Collect valid shares from distinct signers and combine them once `t` are present.
    pub fn aggregate(&self, digest: &Hash256, shares: &[SigShare]) -> Result<JointSignature> {
        let mut valid: BTreeMap<u16, SigShare> = BTreeMap::new();
        for share in shares {
            if valid.contains_key(&share.index) {
                continue;
            }
            match self.verify_share(digest, share) {
                Ok(()) => {
                    valid.insert(share.index, *share);
                }
                Err(e) => {
                    trace!(index = share.index, error = %e, "Skipping invalid share");
                }
            }
        }
        if valid.len() < self.t as usize {
            return Err(CryptoError::NotEnoughShares {
                have: valid.len(),
                need: self.t as usize,
            });
        }
        Ok(JointSignature {
            shares: valid.into_values().collect(),
        })
    }

    pub fn verify_joint(&self, digest: &Hash256, signature: &JointSignature) -> Result<()> {
        let mut last: Option<u16> = None;
        for share in &signature.shares {
            if last.is_some_and(|prev| share.index <= prev) {
                return Err(CryptoError::DuplicateShare(share.index));
            }
            last = Some(share.index);
            self.verify_share(digest, share)?;
        }
        if signature.shares.len() < self.t as usize {
            return Err(CryptoError::NotEnoughShares {
                have: signature.shares.len(),
                need: self.t as usize,
            });
        }
        Ok(())
    }
}

/// One member's share of a committee key.
#[derive(Debug, Clone)]
pub struct DkShare {
    index: u16,
    key_set: PublicKeySet,
    secret: SecretKey,
}

impl DkShare {
    pub fn new(index: u16, key_set: PublicKeySet, secret: SecretKey) -> Result<Self> {
        let expected = key_set.pub_share(index)?;
        if *expected != secret.public_key() {
            return Err(CryptoError::InvalidSecretKey);
        }
        Ok(Self {
            index,
            key_set,
            secret,
        })
    }

    /// Generate shares for a fresh committee of `n` members with threshold `t`.
    pub fn generate_committee(n: u16, t: u16) -> Result<Vec<DkShare>> {
        let secrets: Vec<SecretKey> = (0..n).map(|_| SecretKey::generate()).collect();
        Self::from_secrets(t, secrets)
    }

    /// Deterministic committee generation, for development clusters and tests.
    pub fn generate_committee_from_seed(n: u16, t: u16, seed: &[u8]) -> Result<Vec<DkShare>> {
        let secrets: Vec<SecretKey> = (0..n)
            .map(|i| SecretKey::from_seed(&Hash256::hash_all(&[seed, &i.to_le_bytes()]).0))
            .collect();
        Self::from_secrets(t, secrets)
    }

    fn from_secrets(t: u16, secrets: Vec<SecretKey>) -> Result<Vec<DkShare>> {
        let pub_shares = secrets.iter().map(|s| s.public_key()).collect();
        let key_set = PublicKeySet::new(t, pub_shares)?;
        secrets
            .into_iter()
            .enumerate()
            .map(|(i, secret)| DkShare::new(i as u16, key_set.clone(), secret))
            .collect()
    }

    pub fn key_set(&self) -> &PublicKeySet {
        &self.key_set
    }

    pub fn address(&self) -> Address {
        self.key_set.address()
    }

    pub fn to_record(&self) -> DkShareRecord {
        DkShareRecord {
            address: self.address(),
            n: self.key_set.n,
            t: self.key_set.t,
            index: self.index,
            pub_shares: self.key_set.pub_shares.iter().map(|k| k.to_hex()).collect(),
            secret: self.secret.to_hex(),
        }
    }

    pub fn from_record(record: &DkShareRecord) -> Result<Self> {
        let pub_shares = record
            .pub_shares
            .iter()
            .map(|s| PublicKey::from_hex(s))
            .collect::<Result<Vec<_>>>()?;
        let key_set = PublicKeySet::new(record.t, pub_shares)?;
        if key_set.n != record.n || key_set.address() != record.address {
            return Err(CryptoError::InvalidPublicKey);
        }
        DkShare::new(record.index, key_set, SecretKey::from_hex(&record.secret)?)
    }
}

impl ThresholdSigner for DkShare {
    fn index(&self) -> u16 {
        self.index
    }

    fn n(&self) -> u16 {
        self.key_set.n
    }

    fn t(&self) -> u16 {
        self.key_set.t
    }

    fn sign_share(&self, digest: &Hash256) -> SigShare {
        SigShare {
            index: self.index,
            signature: self.secret.sign(digest.as_bytes()),
        }
    }

    fn verify_share(&self, digest: &Hash256, share: &SigShare) -> Result<()> {
        self.key_set.verify_share(digest, share)
    }

    fn aggregate(&self, digest: &Hash256, shares: &[SigShare]) -> Result<JointSignature> {
        self.key_set.aggregate(digest, shares)
    }

    fn verify_joint(&self, digest: &Hash256, signature: &JointSignature) -> Result<()> {
        self.key_set.verify_joint(digest, signature)
    }
}

/// Serialized form of a [`DkShare`], stored in the node registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkShareRecord {
    pub address: Address,
    pub n: u16,
    pub t: u16,
    pub index: u16,
    pub pub_shares: Vec<String>,
    pub secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::Encodable;

    fn committee() -> Vec<DkShare> {
        DkShare::generate_committee_from_seed(4, 3, b"test committee").unwrap()
    }

    #[test]
    fn test_members_agree_on_address() {
        let shares = committee();
        let address = shares[0].address();
        assert!(shares.iter().all(|s| s.address() == address));
        assert_eq!(shares[2].index(), 2);
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = committee();
        let b = committee();
        assert_eq!(a[0].address(), b[0].address());
    }

    #[test]
    fn test_quorum_aggregates() {
        let shares = committee();
        let digest = Hash256::hash(b"essence");
        let sigs: Vec<SigShare> = shares[..3].iter().map(|s| s.sign_share(&digest)).collect();

        let joint = shares[3].aggregate(&digest, &sigs).unwrap();
        assert_eq!(joint.shares.len(), 3);
        assert!(shares[0].verify_joint(&digest, &joint).is_ok());
        assert!(shares[0]
            .verify_joint(&Hash256::hash(b"other"), &joint)
            .is_err());
    }

    #[test]
    fn test_below_threshold_never_aggregates() {
        let shares = committee();
        let digest = Hash256::hash(b"essence");
        let sigs: Vec<SigShare> = shares[..2].iter().map(|s| s.sign_share(&digest)).collect();

        let err = shares[0].aggregate(&digest, &sigs).unwrap_err();
        assert!(matches!(err, CryptoError::NotEnoughShares { have: 2, need: 3 }));
    }

    #[test]
    fn test_duplicate_and_mismatched_shares_do_not_count() {
        let shares = committee();
        let digest = Hash256::hash(b"essence");
        let wrong = Hash256::hash(b"different essence");
        let sigs = vec![
            shares[0].sign_share(&digest),
            shares[0].sign_share(&digest),
            shares[1].sign_share(&digest),
            shares[2].sign_share(&wrong),
        ];
        assert!(shares[0].aggregate(&digest, &sigs).is_err());
        assert!(shares[0].verify_share(&digest, &sigs[3]).is_err());
    }

    #[test]
    fn test_verify_joint_rejects_duplicates() {
        let shares = committee();
        let digest = Hash256::hash(b"essence");
        let s0 = shares[0].sign_share(&digest);
        let s1 = shares[1].sign_share(&digest);
        let forged = JointSignature {
            shares: vec![s0, s1, s1],
        };
        assert!(matches!(
            shares[0].verify_joint(&digest, &forged),
            Err(CryptoError::DuplicateShare(1))
        ));
    }

    #[test]
    fn test_record_roundtrip() {
        let shares = committee();
        let record = shares[1].to_record();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: DkShareRecord = serde_json::from_str(&json).unwrap();
        let restored = DkShare::from_record(&parsed).unwrap();
        assert_eq!(restored.index(), 1);
        assert_eq!(restored.address(), shares[1].address());

        let digest = Hash256::hash(b"d");
        assert!(shares[0]
            .verify_share(&digest, &restored.sign_share(&digest))
            .is_ok());
    }

    #[test]
    fn test_mismatched_secret_rejected() {
        let shares = committee();
        let result = DkShare::new(0, shares[0].key_set().clone(), SecretKey::generate());
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(DkShare::generate_committee(3, 4).is_err());
        assert!(DkShare::generate_committee(3, 0).is_err());
    }

    #[test]
    fn test_share_encoding_length() {
        let shares = committee();
        let share = shares[0].sign_share(&Hash256::hash(b"x"));
        assert_eq!(share.to_bytes().unwrap().len(), 66);
    }
}
