//! Object type tags that prefix every key inside a partition.

/// The kind of record stored under a key. The discriminants are persisted,
/// so new variants go at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    SchemaVersion = 0,
    BootupData = 1,
    DistributedKeyData = 2,
    SolidState = 3,
    StateUpdateBatch = 4,
    ProcessedRequestId = 5,
    SolidStateIndex = 6,
    StateVariable = 7,
    ProgramMetadata = 8,
    ProgramCode = 9,
    /// Origin transaction of a contract, kept for seeding development ledgers.
    OriginTransaction = 10,
    /// Batch finalized by this node, keyed by the id of the transaction
    /// approving it, until that transaction is confirmed.
    PendingBatch = 11,
}

impl ObjectType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Build a partition-local key: the type tag followed by `suffix`.
pub fn make_key(object_type: ObjectType, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + suffix.len());
    key.push(object_type.tag());
    key.extend_from_slice(suffix);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        assert_eq!(ObjectType::SchemaVersion.tag(), 0);
        assert_eq!(ObjectType::SolidState.tag(), 3);
        assert_eq!(ObjectType::ProgramCode.tag(), 9);
        assert_eq!(ObjectType::PendingBatch.tag(), 11);
    }

    #[test]
    fn test_make_key_prefix() {
        let key = make_key(ObjectType::StateUpdateBatch, &[1, 0, 0, 0]);
        assert_eq!(key, vec![4, 1, 0, 0, 0]);
        assert_eq!(make_key(ObjectType::SolidState, &[]), vec![3]);
    }
}
