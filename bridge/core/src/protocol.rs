//! Envelope Protocol
//!
//! Every frame is one JSON envelope carrying an `id` plus exactly one of:
//!
//! ```text
//! Request:        {"id":"<id>","payload":{"command":"<Name>", ...fields}}
//! Directed call:  {"id":"<id>","callback":{"id":"<ctx>","type":"context|ui"},"data":{"name":"<cap>","args":[...]}}
//! Reply:          {"id":"<id>","data":<value>}  or  {"id":"<id>","error":{"name","message","stack"}}
//! ```
//!
//! Parsing classifies by shape only. Whether a reply-shaped frame matches a
//! pending call is decided by the dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Map;
use thiserror::Error;

use crate::capabilities::CallbackTarget;
use crate::codec::{self, CapturedCallbacks, DecodeError, Value};
use crate::error::RemoteError;

/// Id used for error replies to frames that were not JSON at all
pub const PARSE_ERROR_ID: &str = "parseerror";

/// Protocol command: invoke a callback handed over in an earlier reply
pub const COMMAND_INVOKE: &str = "Invoke";
/// Protocol command: the peer is about to close the connection
pub const COMMAND_QUIT: &str = "Quit";
/// Protocol command: legacy reply delivered as a request
pub const COMMAND_REPLY: &str = "Reply";

/// Identifier linking a request to its reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh id
    pub fn generate() -> Self {
        Self(codec::generate_id())
    }

    /// The id text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A frame that could not be turned into an envelope
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    /// Not a JSON document (or not UTF-8)
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// JSON, but no usable `id`
    #[error("Envelope has no usable id")]
    MissingId,

    /// Request without a string command name
    #[error("Request {id} has no command name")]
    MissingCommand {
        /// Envelope id
        id: CorrelationId,
    },

    /// A field of the envelope has the wrong shape
    #[error("Malformed {part} in envelope {id}: {reason}")]
    Malformed {
        /// Envelope id
        id: CorrelationId,
        /// Which part was malformed
        part: &'static str,
        /// What was wrong
        reason: String,
    },
}

impl FrameDecodeError {
    /// Id to answer under, if any
    ///
    /// Non-JSON text is answered under [`PARSE_ERROR_ID`]; JSON without an id
    /// cannot be answered.
    pub fn reply_id(&self) -> Option<CorrelationId> {
        match self {
            Self::InvalidJson(_) => Some(CorrelationId::from(PARSE_ERROR_ID)),
            Self::MissingId => None,
            Self::MissingCommand { id } | Self::Malformed { id, .. } => Some(id.clone()),
        }
    }

    /// Error payload sent back to the peer
    pub fn to_remote(&self) -> RemoteError {
        RemoteError::new("ParseError", self.to_string())
    }
}

/// Protocol or domain command carried by a request
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Call a registered callback
    Invoke {
        /// Request whose reply carried the callback
        request_id: CorrelationId,
        /// Placeholder id of the callback
        callback_id: String,
        /// Positional arguments
        args: Vec<Value>,
    },
    /// The peer is finishing
    Quit,
    /// Legacy reply to an earlier call
    Reply {
        /// Id of the call being answered
        request_id: CorrelationId,
        /// Result or peer error
        outcome: Result<Value, RemoteError>,
    },
    /// Any other command, by name, with the full payload object
    Named {
        /// Command name
        name: String,
        /// Payload including `command`
        payload: Value,
    },
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `{id, data}` or `{id, error}`
    Reply {
        /// Id of the call being answered
        id: CorrelationId,
        /// Result or peer error
        outcome: Result<Value, RemoteError>,
    },
    /// `{id, callback, data: {name, args}}`
    DirectedCall {
        /// Envelope id
        id: CorrelationId,
        /// Capability group and context
        target: CallbackTarget,
        /// Capability wire name
        name: String,
        /// Positional arguments
        args: Vec<Value>,
    },
    /// `{id, payload: {command, ...}}`
    Request {
        /// Envelope id
        id: CorrelationId,
        /// Decoded command
        command: Command,
    },
}

impl Inbound {
    /// Envelope id
    pub fn id(&self) -> &CorrelationId {
        match self {
            Self::Reply { id, .. } | Self::DirectedCall { id, .. } | Self::Request { id, .. } => id,
        }
    }
}

/// Parse and classify one frame
///
/// A reply-shaped frame always parses: data that cannot be decoded, or a
/// reply with neither `data` nor `error`, becomes a failed outcome for the
/// call it answers.
///
/// # Errors
///
/// Returns a `FrameDecodeError`; see [`FrameDecodeError::reply_id`] for how
/// each variant is answered.
pub fn parse_frame(frame: &[u8]) -> Result<Inbound, FrameDecodeError> {
    let json: serde_json::Value =
        serde_json::from_slice(frame).map_err(|e| FrameDecodeError::InvalidJson(e.to_string()))?;
    let serde_json::Value::Object(mut envelope) = json else {
        return Err(FrameDecodeError::MissingId);
    };

    let id = envelope
        .get("id")
        .and_then(envelope_id)
        .ok_or(FrameDecodeError::MissingId)?;

    if let Some(callback) = envelope.remove("callback").filter(|c| !c.is_null()) {
        return parse_directed_call(id, callback, envelope.remove("data"));
    }

    if let Some(payload) = envelope.remove("payload").filter(|p| !p.is_null()) {
        let command = parse_command(&id, payload)?;
        return Ok(Inbound::Request { id, command });
    }

    let outcome = reply_outcome(envelope.remove("data"), envelope.remove("error"));
    Ok(Inbound::Reply { id, outcome })
}

fn envelope_id(value: &serde_json::Value) -> Option<CorrelationId> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(CorrelationId::from(s.as_str())),
        serde_json::Value::Number(n) => Some(CorrelationId::from(n.to_string())),
        _ => None,
    }
}

fn malformed(id: &CorrelationId, part: &'static str, reason: impl fmt::Display) -> FrameDecodeError {
    FrameDecodeError::Malformed {
        id: id.clone(),
        part,
        reason: reason.to_string(),
    }
}

fn decode_part(
    id: &CorrelationId,
    part: &'static str,
    wire: serde_json::Value,
) -> Result<Value, FrameDecodeError> {
    codec::decode(wire).map_err(|e: DecodeError| malformed(id, part, e))
}

/// Peer error object; anything that is not `{name, message, stack}` is kept
/// as text in `message`.
fn remote_error(wire: serde_json::Value) -> RemoteError {
    match &wire {
        serde_json::Value::String(message) => RemoteError::new("Error", message.clone()),
        serde_json::Value::Object(_) => serde_json::from_value(wire.clone())
            .unwrap_or_else(|_| RemoteError::new("Error", wire.to_string())),
        other => RemoteError::new("Error", other.to_string()),
    }
}

/// Outcome carried by a reply; `data: null` is a value, a missing field is not
fn reply_outcome(
    data: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
) -> Result<Value, RemoteError> {
    match (data, error.filter(|e| !e.is_null())) {
        (_, Some(error)) => Err(remote_error(error)),
        (Some(data), None) => codec::decode(data)
            .map_err(|e| RemoteError::new("DecodeError", format!("Malformed reply data: {e}"))),
        (None, None) => Err(RemoteError::new(
            "ProtocolError",
            "Reply has neither data nor error",
        )),
    }
}

fn parse_directed_call(
    id: CorrelationId,
    callback: serde_json::Value,
    data: Option<serde_json::Value>,
) -> Result<Inbound, FrameDecodeError> {
    let target: CallbackTarget =
        serde_json::from_value(callback).map_err(|e| malformed(&id, "callback", e))?;

    let data = data.ok_or_else(|| malformed(&id, "data", "missing"))?;
    let serde_json::Value::Object(mut data) = data else {
        return Err(malformed(&id, "data", "expected an object"));
    };

    let name = match data.remove("name") {
        Some(serde_json::Value::String(name)) => name,
        _ => return Err(malformed(&id, "data.name", "expected a string")),
    };
    let args = decode_args(&id, data.remove("args"))?;

    Ok(Inbound::DirectedCall {
        id,
        target,
        name,
        args,
    })
}

fn decode_args(
    id: &CorrelationId,
    args: Option<serde_json::Value>,
) -> Result<Vec<Value>, FrameDecodeError> {
    match args {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| decode_part(id, "args", item))
            .collect(),
        Some(_) => Err(malformed(id, "args", "expected an array")),
    }
}

fn string_field(
    id: &CorrelationId,
    payload: &Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<String, FrameDecodeError> {
    match payload.get(field) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(malformed(id, field, "expected a string")),
    }
}

fn parse_command(id: &CorrelationId, payload: serde_json::Value) -> Result<Command, FrameDecodeError> {
    let serde_json::Value::Object(mut payload) = payload else {
        return Err(malformed(id, "payload", "expected an object"));
    };

    let name = match payload.get("command") {
        Some(serde_json::Value::String(name)) if !name.is_empty() => name.clone(),
        _ => return Err(FrameDecodeError::MissingCommand { id: id.clone() }),
    };

    match name.as_str() {
        COMMAND_INVOKE => {
            let request_id = CorrelationId::from(string_field(id, &payload, "requestId")?);
            let callback_id = string_field(id, &payload, "callbackId")?;
            let args = decode_args(id, payload.remove("args"))?;
            Ok(Command::Invoke {
                request_id,
                callback_id,
                args,
            })
        }
        COMMAND_QUIT => Ok(Command::Quit),
        COMMAND_REPLY => {
            let request_id = payload
                .get("request")
                .and_then(|r| r.get("id"))
                .and_then(envelope_id)
                .ok_or_else(|| malformed(id, "request.id", "missing"))?;
            let outcome = reply_outcome(payload.remove("data"), payload.remove("error"));
            Ok(Command::Reply {
                request_id,
                outcome,
            })
        }
        _ => {
            let payload = decode_part(id, "payload", serde_json::Value::Object(payload))?;
            Ok(Command::Named { name, payload })
        }
    }
}

/// Serialize a reply envelope
///
/// Functions inside a successful result are captured into `captured`.
pub fn reply_frame(
    id: &CorrelationId,
    outcome: &Result<Value, RemoteError>,
    captured: &mut CapturedCallbacks,
) -> String {
    let mut envelope = Map::new();
    envelope.insert("id".into(), id.as_str().into());
    match outcome {
        Ok(value) => {
            envelope.insert("data".into(), codec::encode(value, captured));
        }
        Err(error) => {
            envelope.insert("error".into(), error_json(error));
        }
    }
    serde_json::Value::Object(envelope).to_string()
}

fn error_json(error: &RemoteError) -> serde_json::Value {
    let mut map = Map::new();
    map.insert("name".into(), error.name.clone().into());
    map.insert("message".into(), error.message.clone().into());
    if let Some(stack) = &error.stack {
        map.insert("stack".into(), stack.clone().into());
    }
    serde_json::Value::Object(map)
}

/// Serialize a directed-call envelope
pub fn directed_call_frame(
    id: &CorrelationId,
    target: &CallbackTarget,
    name: &str,
    args: &[Value],
    captured: &mut CapturedCallbacks,
) -> String {
    let mut data = Map::new();
    data.insert("name".into(), name.into());
    data.insert(
        "args".into(),
        serde_json::Value::Array(args.iter().map(|a| codec::encode(a, captured)).collect()),
    );

    let mut callback = Map::new();
    callback.insert("id".into(), target.context_id.clone().into());
    callback.insert("type".into(), target.group.as_str().into());

    let mut envelope = Map::new();
    envelope.insert("id".into(), id.as_str().into());
    envelope.insert("callback".into(), serde_json::Value::Object(callback));
    envelope.insert("data".into(), serde_json::Value::Object(data));
    serde_json::Value::Object(envelope).to_string()
}

/// Serialize a request envelope
///
/// `fields` are merged into the payload next to `command`.
pub fn request_frame(
    id: &CorrelationId,
    command: &str,
    fields: Vec<(String, Value)>,
    captured: &mut CapturedCallbacks,
) -> String {
    let mut payload = Map::new();
    payload.insert("command".into(), command.into());
    for (key, value) in fields {
        payload.insert(key, codec::encode(&value, captured));
    }

    let mut envelope = Map::new();
    envelope.insert("id".into(), id.as_str().into());
    envelope.insert("payload".into(), serde_json::Value::Object(payload));
    serde_json::Value::Object(envelope).to_string()
}
