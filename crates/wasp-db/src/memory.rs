//! In-memory store backend.

use crate::store::{KvStore, WriteOp};
use crate::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use wasp_common::Address;

type Key = (Address, Vec<u8>);

/// A [`KvStore`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Key, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all partitions.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, partition: &Address, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(&(*partition, key.to_vec())).cloned())
    }

    fn put(&self, partition: &Address, key: &[u8], value: &[u8]) -> Result<()> {
        self.data
            .write()
            .insert((*partition, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, partition: &Address, key: &[u8]) -> Result<()> {
        self.data.write().remove(&(*partition, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, partition: &Address, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read();
        Ok(data
            .range((*partition, prefix.to_vec())..)
            .take_while(|((p, k), _)| p == partition && k.starts_with(prefix))
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, partition: &Address, ops: Vec<WriteOp>) -> Result<()> {
        let mut data = self.data.write();
        for op in ops {
            match op {
                WriteOp::Put(k, v) => {
                    data.insert((*partition, k), v);
                }
                WriteOp::Delete(k) => {
                    data.remove(&(*partition, k));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitions_are_isolated() {
        let store = MemoryStore::new();
        let a = Address::from_key_material(b"a");
        let b = Address::from_key_material(b"b");
        store.put(&a, b"k", b"1").unwrap();
        assert_eq!(store.get(&a, b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(&b, b"k").unwrap(), None);
    }

    #[test]
    fn test_scan_prefix_stays_in_partition() {
        let store = MemoryStore::new();
        let a = Address::from_key_material(b"a");
        let b = Address::from_key_material(b"b");
        store.put(&a, &[5, 1], b"x").unwrap();
        store.put(&a, &[5, 2], b"y").unwrap();
        store.put(&a, &[6, 1], b"z").unwrap();
        store.put(&b, &[5, 3], b"w").unwrap();

        let found = store.scan_prefix(&a, &[5]).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, vec![5, 1]);
        assert_eq!(found[1].1, b"y".to_vec());
    }

    #[test]
    fn test_write_batch() {
        let store = MemoryStore::new();
        let a = Address::from_key_material(b"a");
        store.put(&a, b"old", b"1").unwrap();
        store
            .write_batch(
                &a,
                vec![
                    WriteOp::Put(b"new".to_vec(), b"2".to_vec()),
                    WriteOp::Delete(b"old".to_vec()),
                ],
            )
            .unwrap();
        assert!(!store.has(&a, b"old").unwrap());
        assert!(store.has(&a, b"new").unwrap());
        assert_eq!(store.len(), 1);
    }
}
