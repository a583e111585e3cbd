//! The key-value store abstraction.

use crate::Result;
use std::sync::Arc;
use wasp_common::Address;

/// A single mutation inside an atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Byte-addressed store split into per-address partitions.
///
/// Implementations must be safe to share between the committee tasks of
/// one node; every method takes `&self`.
pub trait KvStore: Send + Sync {
    fn get(&self, partition: &Address, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, partition: &Address, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, partition: &Address, key: &[u8]) -> Result<()>;

    fn has(&self, partition: &Address, key: &[u8]) -> Result<bool> {
        Ok(self.get(partition, key)?.is_some())
    }

    /// All entries of a partition whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, partition: &Address, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply all operations atomically.
    fn write_batch(&self, partition: &Address, ops: Vec<WriteOp>) -> Result<()>;
}

/// A store handle bound to one partition.
#[derive(Clone)]
pub struct Partition {
    store: Arc<dyn KvStore>,
    address: Address,
}

impl Partition {
    pub fn new(store: Arc<dyn KvStore>, address: Address) -> Self {
        Self { store, address }
    }

    /// The node-wide registry partition.
    pub fn registry(store: Arc<dyn KvStore>) -> Self {
        Self::new(store, Address::NIL)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.store.get(&self.address, key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.store.put(&self.address, key, value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.store.delete(&self.address, key)
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        self.store.has(&self.address, key)
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.store.scan_prefix(&self.address, prefix)
    }

    pub fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        self.store.write_batch(&self.address, ops)
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("address", &self.address)
            .finish()
    }
}
