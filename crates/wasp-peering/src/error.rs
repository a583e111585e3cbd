use thiserror::Error;

/// Peering errors.
#[derive(Debug, Error)]
pub enum PeeringError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] wasp_common::CodecError),

    #[error("message too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("peer {0} is not in the pool")]
    UnknownPeer(String),

    #[error("peer {0} is not connected")]
    NotConnected(String),

    #[error("send queue to {0} is full")]
    QueueFull(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("cannot send to self")]
    SendToSelf,

    #[error("peering already started")]
    AlreadyStarted,
}
