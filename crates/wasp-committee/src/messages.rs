//! Committee-scoped peer messages.
//!
//! Type codes are assigned in order starting at
//! [`FIRST_COMMITTEE_MSG`](wasp_peering::FIRST_COMMITTEE_MSG) and are part
//! of the wire format. Payloads are bincode bodies. `sender_index` and
//! `timestamp` fields are not encoded in the payload; dispatch fills them
//! from the envelope.

use crate::{CommitteeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use wasp_common::{codec, CodecError, Hash256, RequestId, TxId};
use wasp_crypto::SigShare;
use wasp_peering::FIRST_COMMITTEE_MSG;
use wasp_state::StateUpdate;

pub const MSG_STATE_INDEX_PING_PONG: u8 = FIRST_COMMITTEE_MSG;
pub const MSG_NOTIFY_REQUESTS: u8 = FIRST_COMMITTEE_MSG + 1;
pub const MSG_NOTIFY_FINAL_RESULT_POSTED: u8 = FIRST_COMMITTEE_MSG + 2;
pub const MSG_START_PROCESSING_BATCH: u8 = FIRST_COMMITTEE_MSG + 3;
pub const MSG_SIGNED_HASH: u8 = FIRST_COMMITTEE_MSG + 4;
pub const MSG_GET_BATCH: u8 = FIRST_COMMITTEE_MSG + 5;
pub const MSG_BATCH_HEADER: u8 = FIRST_COMMITTEE_MSG + 6;
pub const MSG_STATE_UPDATE: u8 = FIRST_COMMITTEE_MSG + 7;
pub const MSG_TEST_TRACE: u8 = FIRST_COMMITTEE_MSG + 8;

/// Most request ids one `NotifyRequests` may carry. Larger notifications
/// are split.
pub const MAX_NOTIFY_IDS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateIndexPingPongMsg {
    #[serde(skip)]
    pub sender_index: u16,
    pub state_index: u32,
    pub request_pong: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyReqMsg {
    #[serde(skip)]
    pub sender_index: u16,
    pub state_index: u32,
    pub request_ids: Vec<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyFinalResultPostedMsg {
    #[serde(skip)]
    pub sender_index: u16,
    pub state_index: u32,
    pub txid: TxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProcessingBatchMsg {
    #[serde(skip)]
    pub sender_index: u16,
    /// Batch timestamp, taken from the envelope.
    #[serde(skip)]
    pub timestamp: i64,
    pub state_index: u32,
    pub request_ids: Vec<RequestId>,
    pub balances_hash: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHashMsg {
    #[serde(skip)]
    pub sender_index: u16,
    #[serde(skip)]
    pub timestamp: i64,
    pub state_index: u32,
    pub batch_hash: Hash256,
    /// Batch timestamp the signer computed with.
    pub orig_timestamp: i64,
    pub essence_hash: Hash256,
    pub sig_share: SigShare,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBatchMsg {
    #[serde(skip)]
    pub sender_index: u16,
    pub batch_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeaderMsg {
    #[serde(skip)]
    pub sender_index: u16,
    pub state_index: u32,
    pub size: u16,
    pub state_txid: TxId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdateMsg {
    #[serde(skip)]
    pub sender_index: u16,
    pub state_index: u32,
    /// Position of the update inside its batch.
    pub batch_index: u16,
    pub state_update: StateUpdate,
}

/// Diagnostic message walking the committee in a fixed sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTraceMsg {
    #[serde(skip)]
    pub sender_index: u16,
    pub initiator_index: u16,
    pub initial_ts: i64,
    pub sequence: Vec<u16>,
}

/// Every message a committee exchanges with its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitteeMsg {
    StateIndexPingPong(StateIndexPingPongMsg),
    NotifyRequests(NotifyReqMsg),
    NotifyFinalResultPosted(NotifyFinalResultPostedMsg),
    StartProcessingBatch(StartProcessingBatchMsg),
    SignedHash(SignedHashMsg),
    GetBatch(GetBatchMsg),
    BatchHeader(BatchHeaderMsg),
    StateUpdate(StateUpdateMsg),
    TestTrace(TestTraceMsg),
}

impl CommitteeMsg {
    pub fn msg_type(&self) -> u8 {
        match self {
            Self::StateIndexPingPong(_) => MSG_STATE_INDEX_PING_PONG,
            Self::NotifyRequests(_) => MSG_NOTIFY_REQUESTS,
            Self::NotifyFinalResultPosted(_) => MSG_NOTIFY_FINAL_RESULT_POSTED,
            Self::StartProcessingBatch(_) => MSG_START_PROCESSING_BATCH,
            Self::SignedHash(_) => MSG_SIGNED_HASH,
            Self::GetBatch(_) => MSG_GET_BATCH,
            Self::BatchHeader(_) => MSG_BATCH_HEADER,
            Self::StateUpdate(_) => MSG_STATE_UPDATE,
            Self::TestTrace(_) => MSG_TEST_TRACE,
        }
    }

    /// State index the message refers to, if it carries one.
    pub fn state_index(&self) -> Option<u32> {
        match self {
            Self::StateIndexPingPong(m) => Some(m.state_index),
            Self::NotifyRequests(m) => Some(m.state_index),
            Self::NotifyFinalResultPosted(m) => Some(m.state_index),
            Self::StartProcessingBatch(m) => Some(m.state_index),
            Self::SignedHash(m) => Some(m.state_index),
            Self::BatchHeader(m) => Some(m.state_index),
            Self::StateUpdate(m) => Some(m.state_index),
            Self::GetBatch(_) | Self::TestTrace(_) => None,
        }
    }

    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::StateIndexPingPong(m) => codec::encode(m),
            Self::NotifyRequests(m) => codec::encode(m),
            Self::NotifyFinalResultPosted(m) => codec::encode(m),
            Self::StartProcessingBatch(m) => codec::encode(m),
            Self::SignedHash(m) => codec::encode(m),
            Self::GetBatch(m) => codec::encode(m),
            Self::BatchHeader(m) => codec::encode(m),
            Self::StateUpdate(m) => codec::encode(m),
            Self::TestTrace(m) => codec::encode(m),
        }?;
        Ok(bytes)
    }

    /// Decode a payload, stamping sender and timestamp from the envelope.
    pub fn decode(msg_type: u8, data: &[u8], sender_index: u16, timestamp: i64) -> Result<Self> {
        let msg = match msg_type {
            MSG_STATE_INDEX_PING_PONG => Self::StateIndexPingPong(StateIndexPingPongMsg {
                sender_index,
                ..body(data)?
            }),
            MSG_NOTIFY_REQUESTS => {
                let m: NotifyReqMsg = body(data)?;
                if m.request_ids.len() > MAX_NOTIFY_IDS {
                    return Err(CodecError::InvalidValue(format!(
                        "{} request ids in one notification",
                        m.request_ids.len()
                    ))
                    .into());
                }
                Self::NotifyRequests(NotifyReqMsg { sender_index, ..m })
            }
            MSG_NOTIFY_FINAL_RESULT_POSTED => {
                Self::NotifyFinalResultPosted(NotifyFinalResultPostedMsg {
                    sender_index,
                    ..body(data)?
                })
            }
            MSG_START_PROCESSING_BATCH => Self::StartProcessingBatch(StartProcessingBatchMsg {
                sender_index,
                timestamp,
                ..body(data)?
            }),
            MSG_SIGNED_HASH => Self::SignedHash(SignedHashMsg {
                sender_index,
                timestamp,
                ..body(data)?
            }),
            MSG_GET_BATCH => Self::GetBatch(GetBatchMsg {
                sender_index,
                ..body(data)?
            }),
            MSG_BATCH_HEADER => Self::BatchHeader(BatchHeaderMsg {
                sender_index,
                ..body(data)?
            }),
            MSG_STATE_UPDATE => Self::StateUpdate(StateUpdateMsg {
                sender_index,
                ..body(data)?
            }),
            MSG_TEST_TRACE => Self::TestTrace(TestTraceMsg {
                sender_index,
                ..body(data)?
            }),
            other => return Err(CommitteeError::UnknownMessageType(other)),
        };
        Ok(msg)
    }
}

fn body<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(codec::decode(data)?)
}

/// Split a notification into messages of at most [`MAX_NOTIFY_IDS`] ids.
pub fn notify_requests_chunked(
    sender_index: u16,
    state_index: u32,
    request_ids: &[RequestId],
) -> Vec<CommitteeMsg> {
    request_ids
        .chunks(MAX_NOTIFY_IDS)
        .map(|chunk| {
            CommitteeMsg::NotifyRequests(NotifyReqMsg {
                sender_index,
                state_index,
                request_ids: chunk.to_vec(),
            })
        })
        .collect()
}
