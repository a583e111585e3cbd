use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store was written by an incompatible version of the node. Fatal at startup.
    #[error("incompatible database schema: found {found}, expected {expected}")]
    IncompatibleSchema { found: String, expected: String },

    #[error("corrupted record {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("codec error: {0}")]
    Codec(#[from] wasp_common::CodecError),
}
