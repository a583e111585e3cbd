//! Ledger-level identifiers.

use crate::Hash256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Id of a ledger transaction.
pub type TxId = Hash256;

/// Token color. The color of a contract's token is the id of its origin transaction.
pub type Color = Hash256;

/// A 32-byte ledger address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// The nil address. Its store partition holds node-wide records.
    pub const NIL: Address = Address([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Address derived from arbitrary key material.
    pub fn from_key_material(data: &[u8]) -> Self {
        Self(Hash256::hash(data).0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Abbreviated form for logs.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Address::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(Self)
        }
    }
}

/// Identifies one request: the transaction carrying it plus the block index inside it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId {
    pub txid: TxId,
    pub index: u16,
}

impl RequestId {
    pub const ENCODED_LEN: usize = 34;

    pub fn new(txid: TxId, index: u16) -> Self {
        Self { txid, index }
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..32].copy_from_slice(self.txid.as_bytes());
        out[32..].copy_from_slice(&self.index.to_le_bytes());
        out
    }

    pub fn short(&self) -> String {
        format!("{}[{}]", &self.txid.to_hex()[..8], self.index)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.txid, self.index)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_json_is_hex() {
        let a = Address::from_key_material(b"json");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, format!("\"{}\"", a.to_hex()));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), a);
    }

    #[test]
    fn test_address_hex() {
        let a = Address::from_key_material(b"committee");
        assert_eq!(Address::from_hex(&a.to_hex()).unwrap(), a);
        assert_eq!(a.short().len(), 8);
        assert!(Address::NIL.is_nil());
        assert!(!a.is_nil());
    }

    #[test]
    fn test_request_id_bytes_and_order() {
        let tx = Hash256::hash(b"tx");
        let a = RequestId::new(tx, 1);
        let b = RequestId::new(tx, 2);
        assert!(a < b);
        let bytes = a.to_bytes();
        assert_eq!(&bytes[..32], tx.as_bytes());
        assert_eq!(&bytes[32..], &[1, 0]);
    }
}
