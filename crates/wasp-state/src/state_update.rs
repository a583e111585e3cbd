use serde::{Deserialize, Serialize};
use wasp_common::RequestId;

/// One change to a state variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Set(String, Vec<u8>),
    Delete(String),
}

/// The effect of processing one request: an ordered list of mutations.
/// A failed request yields an update with no mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub request_id: RequestId,
    pub mutations: Vec<Mutation>,
}

impl StateUpdate {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            mutations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Vec<u8>) {
        self.mutations.push(Mutation::Set(name.into(), value));
    }

    pub fn delete(&mut self, name: impl Into<String>) {
        self.mutations.push(Mutation::Delete(name.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::{Decodable, Encodable, Hash256};

    #[test]
    fn test_encoding_preserves_order() {
        let mut su = StateUpdate::new(RequestId::new(Hash256::hash(b"r"), 3));
        su.set("b", vec![2]);
        su.delete("a");
        su.set("a", vec![1]);
        let decoded = StateUpdate::from_bytes(&su.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, su);
        assert!(!decoded.is_empty());
    }

    #[test]
    fn test_bad_mutation_kind() {
        let bytes = 9u32.to_le_bytes();
        assert!(Mutation::from_bytes(&bytes).is_err());
    }
}
