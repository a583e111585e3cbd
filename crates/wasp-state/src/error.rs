use thiserror::Error;

/// State errors.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("batch index {got} does not follow state index {current}")]
    WrongBatchIndex { current: u32, got: u32 },

    #[error("state index {0} cannot advance further")]
    IndexOverflow(u32),

    #[error("origin batch must have index 0, got {0}")]
    NotOriginBatch(u32),

    #[error("batch timestamp {batch} is before state timestamp {state}")]
    TimestampRegression { state: i64, batch: i64 },

    #[error("state hash mismatch: expected {expected}, computed {computed}")]
    StateHashMismatch { expected: String, computed: String },

    #[error("variable {name}: {reason}")]
    BadVariable { name: String, reason: String },

    #[error("database error: {0}")]
    Db(#[from] wasp_db::DbError),

    #[error("codec error: {0}")]
    Codec(#[from] wasp_common::CodecError),
}
