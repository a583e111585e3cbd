//! Wire envelope and TCP framing.
//!
//! Envelope layout, little endian:
//!
//! - `[8 bytes timestamp][1 byte type]` header on every message
//! - types [`MSG_HEARTBEAT`] and [`MSG_HANDSHAKE`]: payload runs to the end
//! - types from [`FIRST_COMMITTEE_MSG`]: `[32 bytes address][2 bytes sender
//!   index][4 bytes length][payload]`
//!
//! On TCP every encoded message is prefixed by a 4-byte length.

use crate::{PeeringError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wasp_common::{time, Address, CodecError};

pub const MSG_HEARTBEAT: u8 = 0;
pub const MSG_HANDSHAKE: u8 = 1;
/// Codes below this are reserved for the transport itself.
pub const FIRST_COMMITTEE_MSG: u8 = 0x10;

const HEADER_LEN: usize = 9;
/// Address, sender index and payload length after the header.
const COMMITTEE_HEADER_LEN: usize = 32 + 2 + 4;

/// One message between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// Sender clock, unix nanoseconds.
    pub timestamp: i64,
    pub msg_type: u8,
    /// Target contract. Nil for transport messages.
    pub address: Address,
    /// Sender's index in the committee. Zero for transport messages.
    pub sender_index: u16,
    pub data: Vec<u8>,
}

impl PeerMessage {
    /// Committee message stamped with the local clock.
    pub fn committee(address: Address, msg_type: u8, sender_index: u16, data: Vec<u8>) -> Self {
        Self {
            timestamp: time::now_nanos(),
            msg_type,
            address,
            sender_index,
            data,
        }
    }

    pub fn heartbeat() -> Self {
        Self::transport(MSG_HEARTBEAT, Vec::new())
    }

    /// Handshake carrying the sender's own location.
    pub fn handshake(location: &str) -> Self {
        Self::transport(MSG_HANDSHAKE, location.as_bytes().to_vec())
    }

    fn transport(msg_type: u8, data: Vec<u8>) -> Self {
        Self {
            timestamp: time::now_nanos(),
            msg_type,
            address: Address::NIL,
            sender_index: 0,
            data,
        }
    }

    pub fn is_committee(&self) -> bool {
        self.msg_type >= FIRST_COMMITTEE_MSG
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + COMMITTEE_HEADER_LEN + self.data.len());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push(self.msg_type);
        if self.is_committee() {
            let len = u32::try_from(self.data.len()).map_err(|_| PeeringError::FrameTooLarge {
                size: self.data.len(),
                max: u32::MAX as usize,
            })?;
            out.extend_from_slice(self.address.as_bytes());
            out.extend_from_slice(&self.sender_index.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
        }
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(PeeringError::MessageTooShort(data.len()));
        }
        let (header, rest) = data.split_at(HEADER_LEN);
        let timestamp = i64::from_le_bytes(fixed(&header[..8])?);
        let msg_type = header[8];
        if msg_type < FIRST_COMMITTEE_MSG {
            return Ok(Self {
                timestamp,
                msg_type,
                address: Address::NIL,
                sender_index: 0,
                data: rest.to_vec(),
            });
        }
        if rest.len() < COMMITTEE_HEADER_LEN {
            return Err(PeeringError::MessageTooShort(data.len()));
        }
        let (prefix, payload) = rest.split_at(COMMITTEE_HEADER_LEN);
        let address = Address(fixed(&prefix[..32])?);
        let sender_index = u16::from_le_bytes(fixed(&prefix[32..34])?);
        let len = u32::from_le_bytes(fixed(&prefix[34..])?) as usize;
        if payload.len() != len {
            return Err(CodecError::Decode(format!(
                "payload length {} does not match {} bytes received",
                len,
                payload.len()
            ))
            .into());
        }
        Ok(Self {
            timestamp,
            msg_type,
            address,
            sender_index,
            data: payload.to_vec(),
        })
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| CodecError::Decode(format!("expected {} bytes, got {}", N, bytes.len())).into())
}

/// Read one length-prefixed frame. `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max_frame: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let size = u32::from_le_bytes(len_buf) as usize;
    if size > max_frame {
        return Err(PeeringError::FrameTooLarge {
            size,
            max: max_frame,
        });
    }
    let mut frame = vec![0u8; size];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(frame.len()).map_err(|_| PeeringError::FrameTooLarge {
        size: frame.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committee_layout() {
        let addr = Address::from_key_material(b"sc");
        let msg = PeerMessage {
            timestamp: 7,
            msg_type: 0x12,
            address: addr,
            sender_index: 3,
            data: vec![9, 9],
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 9 + 32 + 2 + 4 + 2);
        assert_eq!(&bytes[..8], &7i64.to_le_bytes());
        assert_eq!(bytes[8], 0x12);
        assert_eq!(&bytes[9..41], addr.as_bytes());
        assert_eq!(&bytes[41..43], &3u16.to_le_bytes());
        assert_eq!(PeerMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_transport_payload_runs_to_end() {
        let msg = PeerMessage::handshake("127.0.0.1:4000");
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), 9 + "127.0.0.1:4000".len());
        let decoded = PeerMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.data, b"127.0.0.1:4000");
        assert!(!decoded.is_committee());

        assert_eq!(PeerMessage::decode(&PeerMessage::heartbeat().encode().unwrap()).unwrap().data.len(), 0);
    }

    #[test]
    fn test_short_and_truncated_messages() {
        assert!(matches!(
            PeerMessage::decode(&[0u8; 8]),
            Err(PeeringError::MessageTooShort(8))
        ));
        let msg = PeerMessage::committee(Address::NIL, 0x10, 0, vec![1, 2, 3]);
        let bytes = msg.encode().unwrap();
        assert!(PeerMessage::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(matches!(
            PeerMessage::decode(&bytes[..20]),
            Err(PeeringError::MessageTooShort(20))
        ));

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(PeerMessage::decode(&longer), Err(PeeringError::Codec(_))));
    }

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        write_frame(&mut a, &[]).await.unwrap();
        drop(a);
        assert_eq!(read_frame(&mut b, 64).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut b, 64).await.unwrap(), Some(vec![]));
        assert_eq!(read_frame(&mut b, 64).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &[0u8; 100]).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, 50).await,
            Err(PeeringError::FrameTooLarge { size: 100, max: 50 })
        ));
    }
}
