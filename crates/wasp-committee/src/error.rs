use thiserror::Error;

/// Committee errors.
#[derive(Debug, Error)]
pub enum CommitteeError {
    #[error("peer index {index} out of range for committee of {size}")]
    PeerIndexOutOfRange { index: u16, size: u16 },

    #[error("cannot send to own peer index")]
    SendToSelf,

    #[error("no peer in the sequence is reachable")]
    NoPeerReachable,

    #[error("unknown committee message type {0:#04x}")]
    UnknownMessageType(u8),

    #[error("invalid bootup data: {0}")]
    InvalidBootupData(String),

    #[error("committee is dismissed")]
    Dismissed,

    #[error("peering error: {0}")]
    Peering(#[from] wasp_peering::PeeringError),

    #[error("codec error: {0}")]
    Codec(#[from] wasp_common::CodecError),

    #[error("state error: {0}")]
    State(#[from] wasp_state::StateError),

    #[error("database error: {0}")]
    Db(#[from] wasp_db::DbError),

    #[error("crypto error: {0}")]
    Crypto(#[from] wasp_crypto::CryptoError),

    #[error("VM error: {0}")]
    Vm(#[from] wasp_vm::VmError),
}
