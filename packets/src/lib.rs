//! Wire vocabulary shared by every RPC port.
//!
//! Four packet kinds travel between sessions: `call`, `response`, `poll` and
//! `list`. Payloads stay opaque (`serde_json::Value`); the protocol layer
//! never looks inside `data`. JSON is the default wire form, and a compact
//! protobuf encoding is available for binary socket frames.

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned by the decoders in this crate.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The bytes were not a valid JSON packet.
    #[error("failed to decode json packet: {0}")]
    Json(#[from] serde_json::Error),
    /// The raw bytes could not be decoded as a protobuf `WirePacket`.
    #[error("failed to decode protobuf packet: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `kind` integer on the wire does not map to a packet kind.
    #[error("invalid packet kind: {0}")]
    InvalidKind(i32),
    /// The `status` integer on the wire does not map to a [`Status`] variant.
    #[error("invalid response status: {0}")]
    InvalidStatus(i32),
}

/// Status of one reply to a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Intermediate update; the call stays open.
    Progress,
    /// Successful terminal reply.
    Success,
    /// Failed terminal reply.
    Fail,
}

impl Status {
    /// Terminal statuses end a call.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }

    /// Convert status into wire enum integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Progress => WireStatus::Progress as i32,
            Self::Success => WireStatus::Success as i32,
            Self::Fail => WireStatus::Fail as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireStatus::try_from(value) {
            Ok(WireStatus::Progress) => Ok(Self::Progress),
            Ok(WireStatus::Success) => Ok(Self::Success),
            Ok(WireStatus::Fail) => Ok(Self::Fail),
            Err(_) => Err(CodecError::InvalidStatus(value)),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An invocation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallPacket {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

/// One reply to a call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponsePacket {
    pub id: String,
    pub status: Status,
    #[serde(default)]
    pub data: Value,
    /// Fraction of work done, attached to progress replies by some handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// "Do you have more for call `id`?"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPacket {
    pub id: String,
}

/// A batch of packets delivered in one physical transmission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacketList {
    pub list: Vec<Packet>,
}

impl PacketList {
    #[must_use]
    pub fn new(list: Vec<Packet>) -> Self {
        Self { list }
    }
}

/// A single message on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    Call(CallPacket),
    Response(ResponsePacket),
    Poll(PollPacket),
    List(PacketList),
}

impl Packet {
    #[must_use]
    pub fn call(id: impl Into<String>, method: impl Into<String>, data: Value) -> Self {
        Self::Call(CallPacket { id: id.into(), method: method.into(), data })
    }

    #[must_use]
    pub fn response(id: impl Into<String>, status: Status, data: Value) -> Self {
        Self::Response(ResponsePacket { id: id.into(), status, data, progress: None })
    }

    #[must_use]
    pub fn poll(id: impl Into<String>) -> Self {
        Self::Poll(PollPacket { id: id.into() })
    }

    /// Wire name of the packet kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Response(_) => "response",
            Self::Poll(_) => "poll",
            Self::List(_) => "list",
        }
    }

    /// Call id the packet refers to. Lists have none.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Call(p) => Some(&p.id),
            Self::Response(p) => Some(&p.id),
            Self::Poll(p) => Some(&p.id),
            Self::List(_) => None,
        }
    }
}

// =============================================================================
// JSON CODEC
// =============================================================================

/// Encode a packet as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if a payload cannot be represented as JSON
/// (for example a map with non-string keys).
pub fn encode_json(packet: &Packet) -> Result<String, CodecError> {
    Ok(serde_json::to_string(packet)?)
}

/// Decode one JSON packet (possibly a `list`).
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed input or unknown packet types.
pub fn decode_json(bytes: &[u8]) -> Result<Packet, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

// =============================================================================
// PROTOBUF CODEC
// =============================================================================

/// Encode a packet into protobuf bytes.
#[must_use]
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let wire = packet_to_wire(packet);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot hit `BufferTooSmall`.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a packet.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes, and
/// [`CodecError::InvalidKind`] / [`CodecError::InvalidStatus`] for
/// out-of-range enum values anywhere in the (possibly nested) packet.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, CodecError> {
    let wire = WirePacket::decode(bytes)?;
    wire_to_packet(wire)
}

fn packet_to_wire(packet: &Packet) -> WirePacket {
    let mut wire = WirePacket::default();
    match packet {
        Packet::Call(p) => {
            wire.kind = WireKind::Call as i32;
            wire.id.clone_from(&p.id);
            wire.method.clone_from(&p.method);
            wire.data = Some(json_to_proto_value(&p.data));
        }
        Packet::Response(p) => {
            wire.kind = WireKind::Response as i32;
            wire.id.clone_from(&p.id);
            wire.status = p.status.as_i32();
            wire.data = Some(json_to_proto_value(&p.data));
            wire.progress = p.progress;
        }
        Packet::Poll(p) => {
            wire.kind = WireKind::Poll as i32;
            wire.id.clone_from(&p.id);
        }
        Packet::List(p) => {
            wire.kind = WireKind::List as i32;
            wire.list = p.list.iter().map(packet_to_wire).collect();
        }
    }
    wire
}

fn wire_to_packet(wire: WirePacket) -> Result<Packet, CodecError> {
    let data = wire.data.as_ref().map_or(Value::Null, proto_to_json_value);
    match WireKind::try_from(wire.kind) {
        Ok(WireKind::Call) => Ok(Packet::Call(CallPacket { id: wire.id, method: wire.method, data })),
        Ok(WireKind::Response) => Ok(Packet::Response(ResponsePacket {
            id: wire.id,
            status: Status::from_i32(wire.status)?,
            data,
            progress: wire.progress,
        })),
        Ok(WireKind::Poll) => Ok(Packet::Poll(PollPacket { id: wire.id })),
        Ok(WireKind::List) => {
            let list = wire
                .list
                .into_iter()
                .map(wire_to_packet)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Packet::List(PacketList { list }))
        }
        Err(_) => Err(CodecError::InvalidKind(wire.kind)),
    }
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => {
            prost_types::value::Kind::NullValue(prost_types::NullValue::NullValue as i32)
        }
        Value::Bool(v) => prost_types::value::Kind::BoolValue(*v),
        Value::Number(v) => prost_types::value::Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => prost_types::value::Kind::StringValue(v.clone()),
        Value::Array(v) => prost_types::value::Kind::ListValue(prost_types::ListValue {
            values: v.iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(v) => prost_types::value::Kind::StructValue(prost_types::Struct {
            fields: v
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

/// Protobuf numbers are doubles; integral values come back as JSON integers
/// so `{"a": 2}` survives a round trip unchanged.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn number_to_json(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0 {
        return Value::from(v as i64);
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn proto_to_json_value(value: &prost_types::Value) -> Value {
    let Some(kind) = &value.kind else {
        return Value::Null;
    };

    match kind {
        prost_types::value::Kind::NullValue(_) => Value::Null,
        prost_types::value::Kind::NumberValue(v) => number_to_json(*v),
        prost_types::value::Kind::StringValue(v) => Value::String(v.clone()),
        prost_types::value::Kind::BoolValue(v) => Value::Bool(*v),
        prost_types::value::Kind::StructValue(v) => Value::Object(
            v.fields
                .iter()
                .map(|(k, v)| (k.clone(), proto_to_json_value(v)))
                .collect(),
        ),
        prost_types::value::Kind::ListValue(v) => {
            Value::Array(v.values.iter().map(proto_to_json_value).collect())
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct WirePacket {
    #[prost(enumeration = "WireKind", tag = "1")]
    kind: i32,
    #[prost(string, tag = "2")]
    id: String,
    #[prost(string, tag = "3")]
    method: String,
    #[prost(enumeration = "WireStatus", tag = "4")]
    status: i32,
    #[prost(message, optional, tag = "5")]
    data: Option<prost_types::Value>,
    #[prost(double, optional, tag = "6")]
    progress: Option<f64>,
    #[prost(message, repeated, tag = "7")]
    list: Vec<WirePacket>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireKind {
    Call = 0,
    Response = 1,
    Poll = 2,
    List = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireStatus {
    Progress = 0,
    Success = 1,
    Fail = 2,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
