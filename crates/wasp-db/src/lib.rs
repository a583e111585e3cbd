//! Persistent storage for rs-wasp.
//!
//! The node keeps everything in one opaque key-value store split into
//! partitions, one per contract address. The nil-address partition holds
//! node-wide records (schema version, bootup data, key shares, program code).
//!
//! Two backends implement [`KvStore`]:
//!
//! - [`SqliteStore`]: durable, one table keyed by `(partition, key)`
//! - [`MemoryStore`]: a `BTreeMap` behind a lock, for tests and dev runs
//!
//! Keys inside a partition start with a one-byte [`ObjectType`] tag.

mod error;
pub mod keys;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod versioning;

pub use error::DbError;
pub use keys::{make_key, ObjectType};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{KvStore, Partition, WriteOp};
pub use versioning::{check_schema_version, DB_SCHEMA_VERSION};

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
