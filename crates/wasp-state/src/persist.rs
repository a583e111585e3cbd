//! Storing contract state in its store partition.

use crate::batch::Batch;
use crate::virtual_state::VirtualState;
use crate::Result;
use tracing::trace;
use wasp_common::{Decodable, Encodable, RequestId, TxId};
use wasp_db::{make_key, ObjectType, Partition, WriteOp};

fn batch_key(state_index: u32) -> Vec<u8> {
    make_key(ObjectType::StateUpdateBatch, &state_index.to_be_bytes())
}

fn pending_key(txid: &TxId) -> Vec<u8> {
    make_key(ObjectType::PendingBatch, txid.as_bytes())
}

fn processed_key(id: &RequestId) -> Vec<u8> {
    make_key(ObjectType::ProcessedRequestId, &id.to_bytes())
}

/// Atomically persist a newly solid state together with the batch that
/// produced it and the processed markers of its requests. Pending batches
/// are dropped: all of them targeted this index or an earlier one.
pub fn save_solid_state(partition: &Partition, state: &VirtualState, batch: &Batch) -> Result<()> {
    let pending = partition.scan_prefix(&make_key(ObjectType::PendingBatch, &[]))?;
    let mut ops = vec![
        WriteOp::Put(make_key(ObjectType::SolidState, &[]), state.to_bytes()?),
        WriteOp::Put(
            make_key(ObjectType::SolidStateIndex, &[]),
            state.state_index().to_le_bytes().to_vec(),
        ),
        WriteOp::Put(batch_key(batch.state_index), batch.to_bytes()?),
    ];
    for id in batch.request_ids() {
        if !id.txid.is_zero() {
            ops.push(WriteOp::Put(processed_key(&id), Vec::new()));
        }
    }
    ops.extend(pending.into_iter().map(|(key, _)| WriteOp::Delete(key)));
    let writes = ops.len();
    partition.write_batch(ops)?;
    trace!(
        state_index = state.state_index(),
        requests = batch.size(),
        writes,
        "Saved solid state"
    );
    Ok(())
}

pub fn load_solid_state(partition: &Partition) -> Result<Option<VirtualState>> {
    match partition.get(&make_key(ObjectType::SolidState, &[]))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(VirtualState::from_bytes(&bytes)?)),
    }
}

pub fn load_solid_state_index(partition: &Partition) -> Result<Option<u32>> {
    match partition.get(&make_key(ObjectType::SolidStateIndex, &[]))? {
        None => Ok(None),
        Some(bytes) => {
            let arr: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                wasp_common::CodecError::InvalidValue("solid state index".to_string())
            })?;
            Ok(Some(u32::from_le_bytes(arr)))
        }
    }
}

pub fn load_batch(partition: &Partition, state_index: u32) -> Result<Option<Batch>> {
    match partition.get(&batch_key(state_index))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(Batch::from_bytes(&bytes)?)),
    }
}

/// Keep a finalized batch until the ledger confirms its transaction, so it
/// survives a restart of the committee.
pub fn save_pending_batch(partition: &Partition, batch: &Batch) -> Result<()> {
    partition.put(&pending_key(&batch.state_txid), &batch.to_bytes()?)?;
    Ok(())
}

pub fn load_pending_batch(partition: &Partition, txid: &TxId) -> Result<Option<Batch>> {
    match partition.get(&pending_key(txid))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(Batch::from_bytes(&bytes)?)),
    }
}

pub fn is_request_processed(partition: &Partition, id: &RequestId) -> Result<bool> {
    Ok(partition.has(&processed_key(id))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::{origin_batch, origin_state};
    use crate::state_update::StateUpdate;
    use std::sync::Arc;
    use wasp_common::{Address, Hash256};
    use wasp_db::MemoryStore;

    #[test]
    fn test_save_and_load() {
        let address = Address::from_key_material(b"sc");
        let partition = Partition::new(Arc::new(MemoryStore::new()), address);
        assert!(load_solid_state(&partition).unwrap().is_none());

        let origin = origin_state(&address);
        save_solid_state(&partition, &origin, &origin_batch(&address)).unwrap();

        let req = RequestId::new(Hash256::hash(b"req"), 0);
        let mut su = StateUpdate::new(req);
        su.set("x", vec![1]);
        let batch = Batch::new(1, 10, vec![su]).with_state_txid(Hash256::hash(b"tx1"));
        let next = origin.with_batch(&batch).unwrap();
        save_solid_state(&partition, &next, &batch).unwrap();

        assert_eq!(load_solid_state(&partition).unwrap(), Some(next));
        assert_eq!(load_solid_state_index(&partition).unwrap(), Some(1));
        assert_eq!(load_batch(&partition, 1).unwrap(), Some(batch));
        assert!(load_batch(&partition, 0).unwrap().is_some());
        assert!(load_batch(&partition, 2).unwrap().is_none());
        assert!(is_request_processed(&partition, &req).unwrap());
        assert!(!is_request_processed(&partition, &RequestId::new(Hash256::ZERO, 0)).unwrap());
    }

    #[test]
    fn test_pending_batch_dropped_when_state_becomes_solid() {
        let address = Address::from_key_material(b"pending");
        let partition = Partition::new(Arc::new(MemoryStore::new()), address);
        let origin = origin_state(&address);
        save_solid_state(&partition, &origin, &origin_batch(&address)).unwrap();

        let txid = Hash256::hash(b"tx1");
        let batch = Batch::new(1, 10, vec![]).with_state_txid(txid);
        let rejected = Batch::new(1, 11, vec![]).with_state_txid(Hash256::hash(b"tx1'"));
        save_pending_batch(&partition, &rejected).unwrap();
        save_pending_batch(&partition, &batch).unwrap();
        assert_eq!(load_pending_batch(&partition, &txid).unwrap(), Some(batch.clone()));
        assert!(load_pending_batch(&partition, &Hash256::hash(b"other")).unwrap().is_none());

        save_solid_state(&partition, &origin.with_batch(&batch).unwrap(), &batch).unwrap();
        assert!(load_pending_batch(&partition, &txid).unwrap().is_none());
        assert!(load_pending_batch(&partition, &rejected.state_txid).unwrap().is_none());
    }
}
