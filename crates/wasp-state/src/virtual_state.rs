use crate::batch::Batch;
use crate::state_update::{Mutation, StateUpdate};
use crate::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wasp_common::{digest, Hash256};

/// Key/value state of one contract.
///
/// A fresh state is empty and accepts only the origin batch (index 0).
/// After that each applied batch must carry index `state_index + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VirtualState {
    initialized: bool,
    state_index: u32,
    timestamp: i64,
    vars: BTreeMap<String, Vec<u8>>,
}

impl VirtualState {
    /// An empty state, before the origin batch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state_index(&self) -> u32 {
        self.state_index
    }

    /// Timestamp of the last applied batch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn vars(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.vars
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.vars.get(name).map(Vec::as_slice)
    }

    pub fn get_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 8] = bytes.try_into().map_err(|_| StateError::BadVariable {
                    name: name.to_string(),
                    reason: format!("expected 8 bytes, got {}", bytes.len()),
                })?;
                Ok(Some(i64::from_le_bytes(arr)))
            }
        }
    }

    pub fn get_hash(&self, name: &str) -> Result<Option<Hash256>> {
        match self.get(name) {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| StateError::BadVariable {
                    name: name.to_string(),
                    reason: format!("expected 32 bytes, got {}", bytes.len()),
                })?;
                Ok(Some(Hash256(arr)))
            }
        }
    }

    pub fn get_string(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| StateError::BadVariable {
                    name: name.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Apply the mutations of one update without touching index or timestamp.
    pub fn apply_state_update(&mut self, update: &StateUpdate) {
        for m in &update.mutations {
            match m {
                Mutation::Set(name, value) => {
                    self.vars.insert(name.clone(), value.clone());
                }
                Mutation::Delete(name) => {
                    self.vars.remove(name);
                }
            }
        }
    }

    /// Apply a whole batch. On error the state is left untouched.
    pub fn apply_batch(&mut self, batch: &Batch) -> Result<()> {
        if !self.initialized {
            if batch.state_index != 0 {
                return Err(StateError::NotOriginBatch(batch.state_index));
            }
        } else {
            let next = self
                .state_index
                .checked_add(1)
                .ok_or(StateError::IndexOverflow(self.state_index))?;
            if batch.state_index != next {
                return Err(StateError::WrongBatchIndex {
                    current: self.state_index,
                    got: batch.state_index,
                });
            }
            if batch.timestamp < self.timestamp {
                return Err(StateError::TimestampRegression {
                    state: self.timestamp,
                    batch: batch.timestamp,
                });
            }
        }
        for update in &batch.updates {
            self.apply_state_update(update);
        }
        self.initialized = true;
        self.state_index = batch.state_index;
        self.timestamp = batch.timestamp;
        Ok(())
    }

    /// A copy of this state with `batch` applied.
    pub fn with_batch(&self, batch: &Batch) -> Result<VirtualState> {
        let mut next = self.clone();
        next.apply_batch(batch)?;
        Ok(next)
    }

    /// Content hash over index, timestamp and sorted variables.
    pub fn hash(&self) -> Hash256 {
        digest(&("vstate", self.state_index, self.timestamp, &self.vars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasp_common::{Decodable, Encodable, RequestId};

    fn update(name: &str, value: i64) -> StateUpdate {
        let mut su = StateUpdate::new(RequestId::new(Hash256::hash(name.as_bytes()), 0));
        su.set(name, value.to_le_bytes().to_vec());
        su
    }

    fn origin() -> VirtualState {
        let mut vs = VirtualState::new();
        vs.apply_batch(&Batch::new(0, 0, vec![])).unwrap();
        vs
    }

    #[test]
    fn test_empty_state_accepts_only_origin() {
        let mut vs = VirtualState::new();
        assert!(matches!(
            vs.apply_batch(&Batch::new(1, 0, vec![])),
            Err(StateError::NotOriginBatch(1))
        ));
        vs.apply_batch(&Batch::new(0, 0, vec![])).unwrap();
        assert!(vs.is_initialized());
        assert_eq!(vs.state_index(), 0);
    }

    #[test]
    fn test_index_advances_by_exactly_one() {
        let mut vs = origin();
        vs.apply_batch(&Batch::new(1, 10, vec![update("a", 1)])).unwrap();
        assert_eq!(vs.state_index(), 1);
        assert_eq!(vs.get_i64("a").unwrap(), Some(1));

        let before = vs.clone();
        let err = vs.apply_batch(&Batch::new(3, 20, vec![update("a", 3)]));
        assert!(matches!(err, Err(StateError::WrongBatchIndex { current: 1, got: 3 })));
        assert_eq!(vs, before);

        // Re-applying the same batch is rejected.
        assert!(vs.apply_batch(&Batch::new(1, 10, vec![update("a", 1)])).is_err());
    }

    #[test]
    fn test_index_overflow_is_an_error() {
        let mut vs = origin();
        vs.state_index = u32::MAX;
        let before = vs.clone();
        assert!(matches!(
            vs.apply_batch(&Batch::new(0, 10, vec![])),
            Err(StateError::IndexOverflow(u32::MAX))
        ));
        assert_eq!(vs, before);
    }

    #[test]
    fn test_timestamp_must_not_regress() {
        let mut vs = origin();
        vs.apply_batch(&Batch::new(1, 100, vec![])).unwrap();
        assert!(matches!(
            vs.apply_batch(&Batch::new(2, 99, vec![])),
            Err(StateError::TimestampRegression { .. })
        ));
    }

    #[test]
    fn test_hash_depends_on_content_and_index() {
        let a = origin().with_batch(&Batch::new(1, 5, vec![update("x", 1)])).unwrap();
        let b = origin().with_batch(&Batch::new(1, 5, vec![update("x", 1)])).unwrap();
        assert_eq!(a.hash(), b.hash());

        let c = origin().with_batch(&Batch::new(1, 5, vec![update("x", 2)])).unwrap();
        assert_ne!(a.hash(), c.hash());
        let d = origin().with_batch(&Batch::new(1, 6, vec![update("x", 1)])).unwrap();
        assert_ne!(a.hash(), d.hash());
    }

    #[test]
    fn test_delete_and_typed_getters() {
        let mut vs = origin();
        let mut su = StateUpdate::new(RequestId::new(Hash256::ZERO, 0));
        su.set("s", b"hello".to_vec());
        su.set("bad", vec![1, 2]);
        su.set("gone", vec![1]);
        su.delete("gone");
        vs.apply_batch(&Batch::new(1, 0, vec![su])).unwrap();

        assert_eq!(vs.get_string("s").unwrap().as_deref(), Some("hello"));
        assert!(vs.get_i64("bad").is_err());
        assert_eq!(vs.get("gone"), None);
        assert_eq!(vs.get_hash("missing").unwrap(), None);
    }

    #[test]
    fn test_encoding() {
        let vs = origin().with_batch(&Batch::new(1, 7, vec![update("k", 9)])).unwrap();
        let decoded = VirtualState::from_bytes(&vs.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, vs);
        assert_eq!(decoded.hash(), vs.hash());
    }
}
