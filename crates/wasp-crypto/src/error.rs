use thiserror::Error;

/// Errors from key handling and threshold signing.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("share index {index} out of range for committee of {n}")]
    ShareIndexOutOfRange { index: u16, n: u16 },

    #[error("invalid threshold parameters: t={t}, n={n}")]
    InvalidThreshold { t: u16, n: u16 },

    #[error("not enough valid shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    #[error("duplicate share from peer {0}")]
    DuplicateShare(u16),
}
