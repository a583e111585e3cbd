//! SQLite store backend.

use crate::schema::initialize_schema;
use crate::store::{KvStore, WriteOp};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;
use wasp_common::Address;

/// A [`KvStore`] backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!(path = %path.display(), "Opening SQLite store");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, partition: &Address, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kvstore WHERE partition = ?1 AND key = ?2",
                params![partition.as_bytes().as_slice(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, partition: &Address, key: &[u8], value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kvstore (partition, key, value) VALUES (?1, ?2, ?3)",
            params![partition.as_bytes().as_slice(), key, value],
        )?;
        Ok(())
    }

    fn delete(&self, partition: &Address, key: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kvstore WHERE partition = ?1 AND key = ?2",
            params![partition.as_bytes().as_slice(), key],
        )?;
        Ok(())
    }

    fn scan_prefix(&self, partition: &Address, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT key, value FROM kvstore WHERE partition = ?1 AND key >= ?2 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![partition.as_bytes().as_slice(), prefix], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, value) = row?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn write_batch(&self, partition: &Address, ops: Vec<WriteOp>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                WriteOp::Put(k, v) => {
                    tx.execute(
                        "INSERT OR REPLACE INTO kvstore (partition, key, value) VALUES (?1, ?2, ?3)",
                        params![partition.as_bytes().as_slice(), k, v],
                    )?;
                }
                WriteOp::Delete(k) => {
                    tx.execute(
                        "DELETE FROM kvstore WHERE partition = ?1 AND key = ?2",
                        params![partition.as_bytes().as_slice(), k],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = Address::from_key_material(b"a");
        store.put(&a, b"k", b"v").unwrap();
        assert_eq!(store.get(&a, b"k").unwrap(), Some(b"v".to_vec()));
        store.delete(&a, b"k").unwrap();
        assert_eq!(store.get(&a, b"k").unwrap(), None);
    }

    #[test]
    fn test_scan_prefix_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = Address::from_key_material(b"a");
        store.put(&a, &[4, 2], b"two").unwrap();
        store.put(&a, &[4, 1], b"one").unwrap();
        store.put(&a, &[5, 0], b"other").unwrap();

        let found = store.scan_prefix(&a, &[4]).unwrap();
        assert_eq!(
            found,
            vec![
                (vec![4, 1], b"one".to_vec()),
                (vec![4, 2], b"two".to_vec())
            ]
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wasp.db");
        let a = Address::from_key_material(b"a");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .write_batch(&a, vec![WriteOp::Put(b"k".to_vec(), b"v".to_vec())])
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get(&a, b"k").unwrap(), Some(b"v".to_vec()));
    }
}
