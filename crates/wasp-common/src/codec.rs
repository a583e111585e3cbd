//! Binary encoding for message payloads and store records.
//!
//! Values are serialized with bincode using fixed-width little-endian
//! integers. Decoding is bounded by [`MAX_ENCODED_LEN`] and rejects
//! trailing bytes, so a buffer decodes to exactly one value or fails.

use crate::Hash256;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced while encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Upper bound on one encoded value.
pub const MAX_ENCODED_LEN: u64 = 64 * 1024 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_ENCODED_LEN)
        .reject_trailing_bytes()
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    options()
        .serialize(value)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    options()
        .deserialize(data)
        .map_err(|e| CodecError::Decode(e.to_string()))
}

struct HashWriter(Sha256);

impl std::io::Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// SHA-256 of the encoding of `value`, without materializing the bytes.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> Hash256 {
    let mut writer = HashWriter(Sha256::new());
    // Only sequences of unknown length fail to encode into an infallible
    // writer, and none of the hashed records contain one.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .serialize_into(&mut writer, value)
        .expect("hashed record encoding");
    Hash256(writer.0.finalize().into())
}

/// Types stored or sent in their binary encoding.
pub trait Encodable: Serialize {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }
}

impl<T: Serialize + ?Sized> Encodable for T {}

/// Types read back from their binary encoding.
pub trait Decodable: DeserializeOwned {
    fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        decode(data)
    }
}

impl<T: DeserializeOwned> Decodable for T {}
