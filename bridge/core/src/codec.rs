//! Message Codec
//!
//! Converts between JSON wire values and in-process [`Value`]s. Two shapes
//! get special treatment:
//!
//! | In process                 | On the wire                                |
//! |----------------------------|--------------------------------------------|
//! | `Value::Buffer(bytes)`     | `{"type":"Buffer","data":"<base64>"}`      |
//! | `Value::Function(cb)`      | `{"__callback":"<placeholder id>"}`        |
//!
//! Encoding a function mints a fresh placeholder id and captures the
//! function in a [`CapturedCallbacks`] set, which the caller registers under
//! the id of the envelope being built. Decoding yields
//! `Value::RemoteFunction(id)` for placeholders minted by the peer.
//!
//! Numbers are carried as `serde_json::Number`, so the full `u64` and `i64`
//! ranges survive without precision loss.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Number};
use thiserror::Error;

use crate::error::RemoteError;

/// Key marking a function placeholder
pub const CALLBACK_KEY: &str = "__callback";

/// `type` tag marking a binary buffer
pub const BUFFER_TAG: &str = "Buffer";

/// Future returned by a local callback
pub type CallbackFuture = BoxFuture<'static, Result<Value, RemoteError>>;

type UnaryFn = dyn Fn(Value) -> CallbackFuture + Send + Sync;
type VariadicFn = dyn Fn(Vec<Value>) -> CallbackFuture + Send + Sync;

/// A local function that can be handed to the peer
///
/// Unary callbacks receive a single positional argument (null when the peer
/// sends none); variadic callbacks receive the whole argument list.
#[derive(Clone)]
pub enum Callback {
    /// Takes exactly one argument
    Unary(Arc<UnaryFn>),
    /// Takes the full argument list
    Variadic(Arc<VariadicFn>),
}

impl Callback {
    /// Wrap a single-argument async function
    pub fn unary<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        Self::Unary(Arc::new(move |arg| f(arg).boxed()))
    }

    /// Wrap an async function taking the whole argument list
    pub fn variadic<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        Self::Variadic(Arc::new(move |args| f(args).boxed()))
    }

    /// Call the function with a decoded argument list
    ///
    /// # Errors
    ///
    /// Returns the function's own error, or an `ArgumentError` when a unary
    /// callback is given more than one argument.
    pub async fn invoke(&self, mut args: Vec<Value>) -> Result<Value, RemoteError> {
        match self {
            Self::Unary(f) => match args.len() {
                0 => f(Value::Null).await,
                1 => f(args.remove(0)).await,
                n => Err(RemoteError::new(
                    "ArgumentError",
                    format!("callback takes 1 argument, {n} given"),
                )),
            },
            Self::Variadic(f) => f(args).await,
        }
    }

    /// Check whether two handles point at the same function
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unary(a), Self::Unary(b)) => Arc::ptr_eq(a, b),
            (Self::Variadic(a), Self::Variadic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(_) => f.write_str("Callback::Unary"),
            Self::Variadic(_) => f.write_str("Callback::Variadic"),
        }
    }
}

/// Shape mismatch while decoding a wire value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Value has the wrong kind
    #[error("expected {expected}, found {found}")]
    Type {
        /// Kind the caller asked for
        expected: &'static str,
        /// Kind actually present
        found: &'static str,
    },

    /// A named field failed to decode
    #[error("field '{field}'")]
    Field {
        /// Field name
        field: String,
        /// Underlying mismatch
        #[source]
        source: Box<DecodeError>,
    },

    /// Numeric value does not fit the target type
    #[error("{value} is out of range for {target}")]
    OutOfRange {
        /// Textual form of the value
        value: String,
        /// Target type name
        target: &'static str,
    },

    /// Sequence has the wrong number of elements
    #[error("expected {expected} elements, found {found}")]
    Length {
        /// Required element count
        expected: usize,
        /// Actual element count
        found: usize,
    },

    /// Tagged buffer carried unusable data
    #[error("invalid buffer data: {0}")]
    Buffer(String),
}

impl DecodeError {
    fn in_field(self, field: &str) -> Self {
        Self::Field {
            field: field.to_string(),
            source: Box::new(self),
        }
    }
}

/// In-process value exchanged with the peer
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// JSON null
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Number, exact for the full `u64`/`i64` range
    Number(Number),
    /// UTF-8 string
    String(String),
    /// Ordered sequence
    Array(Vec<Value>),
    /// String-keyed mapping
    Object(BTreeMap<String, Value>),
    /// Binary data
    Buffer(Vec<u8>),
    /// Local function to be exposed to the peer
    Function(Callback),
    /// Placeholder for a function living in the peer
    RemoteFunction(String),
}

impl Value {
    /// Build an object from key/value pairs
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Kind name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Buffer(_) => "buffer",
            Self::Function(_) => "function",
            Self::RemoteFunction(_) => "remote function",
        }
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Elements, if this is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Entries, if this is an object
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up an object field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Set an object field; no effect on non-objects
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Self::Object(map) = self {
            map.insert(key.into(), value);
        }
    }

    /// Take the bytes out of a buffer value
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Type` for any other kind.
    pub fn into_bytes(self) -> Result<Vec<u8>, DecodeError> {
        match self {
            Self::Buffer(bytes) => Ok(bytes),
            other => Err(DecodeError::Type {
                expected: "buffer",
                found: other.kind(),
            }),
        }
    }

    /// Decode into a typed value
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` describing the first mismatch.
    pub fn decode<T: FromValue>(&self) -> Result<T, DecodeError> {
        T::from_value(self)
    }

    /// Decode an optional object field; absent and null both give `None`
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Field` when the field is present but malformed.
    pub fn field<T: FromValue>(&self, key: &str) -> Result<Option<T>, DecodeError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::from_value(value).map(Some).map_err(|e| e.in_field(key)),
        }
    }

    /// Decode an object field, falling back to `default` when absent
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::Field` when the field is present but malformed.
    pub fn field_or<T: FromValue>(&self, key: &str, default: T) -> Result<T, DecodeError> {
        Ok(self.field(key)?.unwrap_or(default))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::RemoteFunction(a), Self::RemoteFunction(b)) => a == b,
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Self::Number(Number::from(n))
            }
        })*
    };
}

impl_from_number!(i32, i64, u32, u64);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<Callback> for Value {
    fn from(cb: Callback) -> Self {
        Self::Function(cb)
    }
}

/// Typed extraction from a [`Value`]
pub trait FromValue: Sized {
    /// Decode `value` as `Self`
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` when the shape does not match.
    fn from_value(value: &Value) -> Result<Self, DecodeError>;
}

fn type_error<T>(expected: &'static str, found: &Value) -> Result<T, DecodeError> {
    Err(DecodeError::Type {
        expected,
        found: found.kind(),
    })
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => type_error("string", other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => type_error("bool", other),
        }
    }
}

impl FromValue for u64 {
    /// Numeric strings are accepted for unsigned ids.
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Number(n) => n.as_u64().ok_or_else(|| DecodeError::OutOfRange {
                value: n.to_string(),
                target: "u64",
            }),
            Value::String(s) => s.trim().parse().map_err(|_| DecodeError::OutOfRange {
                value: s.clone(),
                target: "u64",
            }),
            other => type_error("unsigned integer", other),
        }
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let wide = u64::from_value(value).map_err(|e| match e {
            DecodeError::OutOfRange { value, .. } => DecodeError::OutOfRange {
                value,
                target: "u32",
            },
            other => other,
        })?;
        u32::try_from(wide).map_err(|_| DecodeError::OutOfRange {
            value: wide.to_string(),
            target: "u32",
        })
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Number(n) => n.as_i64().ok_or_else(|| DecodeError::OutOfRange {
                value: n.to_string(),
                target: "i64",
            }),
            Value::String(s) => s.trim().parse().map_err(|_| DecodeError::OutOfRange {
                value: s.clone(),
                target: "i64",
            }),
            other => type_error("integer", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| DecodeError::OutOfRange {
            value: wide.to_string(),
            target: "i32",
        })
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            other => type_error("array", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Functions captured while encoding one envelope
#[derive(Debug, Default)]
pub struct CapturedCallbacks {
    callbacks: HashMap<String, Callback>,
}

impl CapturedCallbacks {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of captured functions
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Check if nothing was captured
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Placeholder id → function map
    pub fn into_inner(self) -> HashMap<String, Callback> {
        self.callbacks
    }
}

/// Mint a placeholder or correlation id (UUID v4, 32 hex digits)
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Encode a value for the wire, capturing any functions it contains
pub fn encode(value: &Value, captured: &mut CapturedCallbacks) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| encode(v, captured)).collect())
        }
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), encode(v, captured)))
                .collect(),
        ),
        Value::Buffer(bytes) => {
            let mut tagged = Map::new();
            tagged.insert("type".into(), BUFFER_TAG.into());
            tagged.insert("data".into(), BASE64.encode(bytes).into());
            serde_json::Value::Object(tagged)
        }
        Value::Function(cb) => {
            let id = generate_id();
            captured.callbacks.insert(id.clone(), cb.clone());
            placeholder(id)
        }
        Value::RemoteFunction(id) => placeholder(id.clone()),
    }
}

fn placeholder(id: String) -> serde_json::Value {
    let mut map = Map::new();
    map.insert(CALLBACK_KEY.into(), serde_json::Value::String(id));
    serde_json::Value::Object(map)
}

/// Decode a wire value
///
/// # Errors
///
/// Returns `DecodeError::Buffer` for a tagged buffer whose data is neither
/// base64 text nor an array of bytes.
pub fn decode(wire: serde_json::Value) -> Result<Value, DecodeError> {
    Ok(match wire {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(decode).collect::<Result<_, _>>()?)
        }
        serde_json::Value::Object(map) => decode_object(map)?,
    })
}

fn decode_object(mut map: Map<String, serde_json::Value>) -> Result<Value, DecodeError> {
    if map.len() == 1 {
        if let Some(serde_json::Value::String(id)) = map.get(CALLBACK_KEY) {
            return Ok(Value::RemoteFunction(id.clone()));
        }
    }

    if map.len() == 2 && map.get("type").and_then(serde_json::Value::as_str) == Some(BUFFER_TAG) {
        if let Some(data) = map.remove("data") {
            return decode_buffer(data).map(Value::Buffer);
        }
    }

    map.into_iter()
        .map(|(k, v)| decode(v).map(|v| (k, v)))
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map(Value::Object)
}

/// Base64 text, or a plain `[n, n, ...]` array of bytes
fn decode_buffer(data: serde_json::Value) -> Result<Vec<u8>, DecodeError> {
    match data {
        serde_json::Value::String(text) => BASE64
            .decode(text.as_bytes())
            .map_err(|e| DecodeError::Buffer(e.to_string())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| DecodeError::Buffer(format!("{item} is not a byte")))
            })
            .collect(),
        other => Err(DecodeError::Buffer(format!("unexpected data {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_primitives_pass_through() {
        let mut captured = CapturedCallbacks::new();
        let value = Value::object([
            ("n", Value::Null),
            ("b", true.into()),
            ("s", "text".into()),
            ("list", vec![1u32, 2, 3].into()),
        ]);

        let wire = encode(&value, &mut captured);
        assert_eq!(wire, json!({"n": null, "b": true, "s": "text", "list": [1, 2, 3]}));
        assert!(captured.is_empty());
        assert_eq!(decode(wire).unwrap(), value);
    }

    #[test]
    fn test_buffer_encodes_as_tagged_base64() {
        let mut captured = CapturedCallbacks::new();
        let wire = encode(&Value::Buffer(b"hello".to_vec()), &mut captured);
        assert_eq!(wire, json!({"type": "Buffer", "data": "aGVsbG8="}));
    }

    #[test]
    fn test_nested_buffer_round_trip() {
        let mut captured = CapturedCallbacks::new();
        let value = Value::object([(
            "files",
            Value::Array(vec![
                Value::Buffer(vec![0, 255, 128]),
                Value::object([("inner", Value::Buffer(Vec::new()))]),
            ]),
        )]);

        let decoded = decode(encode(&value, &mut captured)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_buffer_accepts_plain_byte_array() {
        let decoded = decode(json!({"type": "Buffer", "data": [104, 105]})).unwrap();
        assert_eq!(decoded, Value::Buffer(b"hi".to_vec()));
    }

    #[test]
    fn test_buffer_rejects_bad_base64() {
        let err = decode(json!({"type": "Buffer", "data": "@@@"})).unwrap_err();
        assert!(matches!(err, DecodeError::Buffer(_)));
    }

    #[test]
    fn test_object_with_type_field_is_not_a_buffer() {
        let decoded = decode(json!({"type": "Buffer", "size": 3, "data": "AAA="})).unwrap();
        assert!(matches!(decoded, Value::Object(_)));
    }

    #[test]
    fn test_function_captured_with_fresh_placeholder() {
        let cb = Callback::unary(|v| async move { Ok(v) });
        let value = Value::Array(vec![cb.clone().into(), cb.into()]);

        let mut captured = CapturedCallbacks::new();
        let wire = encode(&value, &mut captured);

        let ids: Vec<&str> = wire
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p[CALLBACK_KEY].as_str().unwrap())
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ids[0].len(), 32);
        assert_eq!(captured.len(), 2);
    }

    #[test]
    fn test_placeholder_decodes_to_remote_function() {
        let decoded = decode(json!({"__callback": "abc"})).unwrap();
        assert_eq!(decoded, Value::RemoteFunction("abc".into()));

        let mut captured = CapturedCallbacks::new();
        assert_eq!(encode(&decoded, &mut captured), json!({"__callback": "abc"}));
        assert!(captured.is_empty());
    }

    #[test]
    fn test_u64_keeps_full_precision() {
        let value = decode(json!(u64::MAX)).unwrap();
        assert_eq!(value.decode::<u64>().unwrap(), u64::MAX);
        assert_eq!(
            decode(json!(i64::MIN)).unwrap().decode::<i64>().unwrap(),
            i64::MIN
        );
    }

    #[test]
    fn test_unsigned_accepts_numeric_string() {
        assert_eq!(Value::from("76561198000000000").decode::<u64>().unwrap(), 76_561_198_000_000_000);
        assert!(Value::from("abc").decode::<u64>().is_err());
    }

    #[test]
    fn test_u32_out_of_range() {
        let err = Value::from(u64::from(u32::MAX) + 1).decode::<u32>().unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { target: "u32", .. }));
    }

    #[test]
    fn test_field_defaults_and_errors() {
        let value = Value::object([("MaxServers", Value::from(4u32)), ("Branch", Value::Null)]);

        assert_eq!(value.field_or("MaxServers", 20u32).unwrap(), 4);
        assert_eq!(value.field_or("MaxDownloads", 8u32).unwrap(), 8);
        assert_eq!(value.field::<String>("Branch").unwrap(), None);

        let err = value.field::<String>("MaxServers").unwrap_err();
        assert!(matches!(err, DecodeError::Field { ref field, .. } if field == "MaxServers"));
    }

    #[tokio::test]
    async fn test_unary_invoke_arity() {
        let cb = Callback::unary(|v| async move { Ok(v) });

        assert_eq!(cb.invoke(vec![]).await.unwrap(), Value::Null);
        assert_eq!(cb.invoke(vec!["a".into()]).await.unwrap(), Value::from("a"));

        let err = cb.invoke(vec!["a".into(), "b".into()]).await.unwrap_err();
        assert_eq!(err.name, "ArgumentError");
    }

    #[tokio::test]
    async fn test_variadic_receives_all_args() {
        let cb = Callback::variadic(|args| async move { Ok(Value::from(args.len() as u64)) });
        let result = cb.invoke(vec![Value::Null, 1u32.into(), "x".into()]).await.unwrap();
        assert_eq!(result, Value::from(3u64));
    }
}
