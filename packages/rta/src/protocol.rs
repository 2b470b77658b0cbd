//! RTA V2 wire format.
//!
//! Every frame is a WebSocket text message holding a JSON array whose first
//! element is the message kind:
//!
//! ```text
//! [1, seq, uri]                      subscribe
//! [1, seq, 0, subscription_id, data] subscribe reply (success)
//! [1, seq, status, message?]         subscribe reply (failure)
//! [2, seq, subscription_id]          unsubscribe
//! [2, seq, status, message?]         unsubscribe reply
//! [3, subscription_id, data]         event
//! [4]                                resync
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

const KIND_SUBSCRIBE: u64 = 1;
const KIND_UNSUBSCRIBE: u64 = 2;
const KIND_EVENT: u64 = 3;
const KIND_RESYNC: u64 = 4;

/// Request kinds that are correlated by sequence number. Each kind has its
/// own pending-request table on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
}

impl RequestKind {
    pub const ALL: [RequestKind; 2] = [RequestKind::Subscribe, RequestKind::Unsubscribe];

    pub(crate) fn index(self) -> usize {
        match self {
            RequestKind::Subscribe => 0,
            RequestKind::Unsubscribe => 1,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Subscribe => f.write_str("subscribe"),
            RequestKind::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

/// Handshake status carried in subscribe and unsubscribe replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    UnknownResource,
    SubscriptionLimitReached,
    NoResourceData,
    Throttled,
    ServiceUnavailable,
    Unknown(u64),
}

impl Status {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => Status::Success,
            1 => Status::UnknownResource,
            2 => Status::SubscriptionLimitReached,
            3 => Status::NoResourceData,
            1000 => Status::Throttled,
            1001 => Status::ServiceUnavailable,
            other => Status::Unknown(other),
        }
    }

    pub fn code(self) -> u64 {
        match self {
            Status::Success => 0,
            Status::UnknownResource => 1,
            Status::SubscriptionLimitReached => 2,
            Status::NoResourceData => 3,
            Status::Throttled => 1000,
            Status::ServiceUnavailable => 1001,
            Status::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => f.write_str("success"),
            Status::UnknownResource => f.write_str("unknown resource"),
            Status::SubscriptionLimitReached => f.write_str("subscription limit reached"),
            Status::NoResourceData => f.write_str("no resource data"),
            Status::Throttled => f.write_str("throttled"),
            Status::ServiceUnavailable => f.write_str("service unavailable"),
            Status::Unknown(code) => write!(f, "status {code}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a non-empty json array")]
    NotAnArray,

    #[error("unknown message kind {0}")]
    UnknownKind(u64),

    #[error("missing or invalid {field} at index {index}")]
    Field { index: usize, field: &'static str },

    #[error("binary frames are not part of the protocol")]
    Binary,

    #[error("server reused live subscription id {0}")]
    DuplicateSubscription(u32),

    #[error("invalid event payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// A decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply(Reply),
    Event { subscription_id: u32, data: Value },
    Resync,
}

/// A decoded handshake reply, matched to its caller by `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub kind: RequestKind,
    pub seq: u32,
    pub status: Status,
    /// Set on successful subscribe replies only.
    pub subscription_id: Option<u32>,
    /// Custom data attached to a successful subscribe reply.
    pub data: Value,
    /// Optional human readable reason attached to a failed reply.
    pub message: Option<String>,
}

pub fn encode_subscribe(seq: u32, resource: &str) -> String {
    json!([KIND_SUBSCRIBE, seq, resource]).to_string()
}

pub fn encode_unsubscribe(seq: u32, subscription_id: u32) -> String {
    json!([KIND_UNSUBSCRIBE, seq, subscription_id]).to_string()
}

pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let items = match value.as_array() {
        Some(items) if !items.is_empty() => items,
        _ => return Err(ProtocolError::NotAnArray),
    };

    match uint_at(items, 0, "kind")? {
        KIND_SUBSCRIBE => decode_reply(RequestKind::Subscribe, items).map(Inbound::Reply),
        KIND_UNSUBSCRIBE => decode_reply(RequestKind::Unsubscribe, items).map(Inbound::Reply),
        KIND_EVENT => Ok(Inbound::Event {
            subscription_id: u32_at(items, 1, "subscription id")?,
            data: items.get(2).cloned().unwrap_or(Value::Null),
        }),
        KIND_RESYNC => Ok(Inbound::Resync),
        other => Err(ProtocolError::UnknownKind(other)),
    }
}

fn decode_reply(kind: RequestKind, items: &[Value]) -> Result<Reply, ProtocolError> {
    let seq = u32_at(items, 1, "sequence number")?;
    let status = Status::from_code(uint_at(items, 2, "status")?);

    if !status.is_success() {
        return Ok(Reply {
            kind,
            seq,
            status,
            subscription_id: None,
            data: Value::Null,
            message: items.get(3).and_then(Value::as_str).map(str::to_owned),
        });
    }

    let subscription_id = match kind {
        RequestKind::Subscribe => Some(u32_at(items, 3, "subscription id")?),
        RequestKind::Unsubscribe => None,
    };
    let data = match kind {
        RequestKind::Subscribe => items.get(4).cloned().unwrap_or(Value::Null),
        RequestKind::Unsubscribe => Value::Null,
    };

    Ok(Reply {
        kind,
        seq,
        status,
        subscription_id,
        data,
        message: None,
    })
}

fn uint_at(items: &[Value], index: usize, field: &'static str) -> Result<u64, ProtocolError> {
    items
        .get(index)
        .and_then(Value::as_u64)
        .ok_or(ProtocolError::Field { index, field })
}

fn u32_at(items: &[Value], index: usize, field: &'static str) -> Result<u32, ProtocolError> {
    uint_at(items, index, field)?
        .try_into()
        .map_err(|_| ProtocolError::Field { index, field })
}

/// One change notification inside an event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoulderTap {
    pub resource: String,
    pub branch: Uuid,
    pub change_number: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShoulderTaps {
    shoulder_taps: Vec<ShoulderTap>,
}

/// Extract the change notifications from an event payload, in order.
pub fn shoulder_taps(data: &Value) -> Result<Vec<ShoulderTap>, ProtocolError> {
    ShoulderTaps::deserialize(data)
        .map(|taps| taps.shoulder_taps)
        .map_err(ProtocolError::Payload)
}
