//! Record-level schema versioning.
//!
//! The version record lives in the registry partition under the
//! `SchemaVersion` tag. It holds the version byte followed by a checksum of
//! the version string, so a store written by an incompatible build is
//! detected even if the byte happens to collide. A mismatch is fatal: the
//! node must not start on such a store.

use crate::keys::{make_key, ObjectType};
use crate::store::KvStore;
use crate::{DbError, Result};
use tracing::info;
use wasp_common::{Address, Hash256};

/// Increment whenever the encoding of any persisted record changes.
pub const DB_SCHEMA_VERSION: u8 = 2;

fn version_value(version: u8) -> Vec<u8> {
    let checksum = Hash256::hash(format!("dbversion = {}", version).as_bytes());
    let mut value = Vec::with_capacity(33);
    value.push(version);
    value.extend_from_slice(checksum.as_bytes());
    value
}

fn describe(value: &[u8]) -> String {
    match value.first() {
        Some(v) if value.len() == 33 => format!("version {} (checksum {})", v, hex::encode(&value[1..5])),
        _ => format!("unrecognized record of {} bytes", value.len()),
    }
}

/// Write the current version into a fresh store, or verify an existing one.
pub fn check_schema_version(store: &dyn KvStore) -> Result<()> {
    let key = make_key(ObjectType::SchemaVersion, &[]);
    let expected = version_value(DB_SCHEMA_VERSION);
    match store.get(&Address::NIL, &key)? {
        None => {
            store.put(&Address::NIL, &key, &expected)?;
            info!(version = DB_SCHEMA_VERSION, "Recorded database schema version");
            Ok(())
        }
        Some(found) if found == expected => Ok(()),
        Some(found) => Err(DbError::IncompatibleSchema {
            found: describe(&found),
            expected: describe(&expected),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_fresh_store_gets_version() {
        let store = MemoryStore::new();
        check_schema_version(&store).unwrap();
        let key = make_key(ObjectType::SchemaVersion, &[]);
        let stored = store.get(&Address::NIL, &key).unwrap().unwrap();
        assert_eq!(stored[0], DB_SCHEMA_VERSION);
        assert_eq!(stored.len(), 33);
        // Second check passes.
        check_schema_version(&store).unwrap();
    }

    #[test]
    fn test_mismatch_is_error() {
        let store = MemoryStore::new();
        let key = make_key(ObjectType::SchemaVersion, &[]);
        store
            .put(&Address::NIL, &key, &version_value(DB_SCHEMA_VERSION + 1))
            .unwrap();
        let err = check_schema_version(&store).unwrap_err();
        assert!(matches!(err, DbError::IncompatibleSchema { .. }));
    }

    #[test]
    fn test_describe_shows_checksum_prefix() {
        let value = version_value(7);
        let checksum = Hash256::hash(b"dbversion = 7");
        assert_eq!(
            describe(&value),
            format!("version 7 (checksum {})", &checksum.to_hex()[..8])
        );
        assert_eq!(describe(&[1, 2]), "unrecognized record of 2 bytes");
    }

    #[test]
    fn test_corrupted_checksum_is_error() {
        let store = MemoryStore::new();
        let key = make_key(ObjectType::SchemaVersion, &[]);
        let mut value = version_value(DB_SCHEMA_VERSION);
        value[5] ^= 0xff;
        store.put(&Address::NIL, &key, &value).unwrap();
        assert!(check_schema_version(&store).is_err());
    }
}
