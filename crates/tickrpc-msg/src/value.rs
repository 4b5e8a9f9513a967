//! ---
//! trpc_section: "02-messaging-ipc-data-model"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Message schema helpers and transport seam."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ProcedureCall;

/// Dynamically typed value carried in call arguments and results.
///
/// Equality is structural: sequences compare element-wise in order, sets by
/// membership regardless of order, maps by key set and per-key value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value, used for nullable parameters and void returns.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Unsigned integer scalar.
    UInt(u64),
    /// Floating point scalar. NaN compares equal to NaN.
    Float(f64),
    /// UTF-8 string scalar.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Handle to a server-side object.
    Object(u64),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Fixed-arity ordered sequence.
    Tuple(Vec<Value>),
    /// Unordered collection.
    Set(Vec<Value>),
    /// Key/value pairs; key order is not significant.
    Map(Vec<(Value, Value)>),
    /// A procedure call passed by value, e.g. to register a stream.
    Call(ProcedureCall),
}

/// Type tags used to validate call arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Accepts any value.
    Any,
    /// See [`Value::Null`].
    Null,
    /// See [`Value::Bool`].
    Bool,
    /// See [`Value::Int`].
    Int,
    /// See [`Value::UInt`].
    UInt,
    /// See [`Value::Float`].
    Float,
    /// See [`Value::String`].
    String,
    /// See [`Value::Bytes`].
    Bytes,
    /// See [`Value::Object`].
    Object,
    /// See [`Value::List`].
    List,
    /// See [`Value::Tuple`].
    Tuple,
    /// See [`Value::Set`].
    Set,
    /// See [`Value::Map`].
    Map,
    /// See [`Value::Call`].
    Call,
}

impl ValueKind {
    /// Whether `value` is acceptable where this kind is expected.
    pub fn accepts(&self, value: &Value) -> bool {
        *self == ValueKind::Any || *self == value.kind()
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Any => "any",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::UInt => "uint",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Object => "object",
            ValueKind::List => "list",
            ValueKind::Tuple => "tuple",
            ValueKind::Set => "set",
            ValueKind::Map => "map",
            ValueKind::Call => "call",
        };
        f.write_str(name)
    }
}

impl Value {
    /// The type tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::UInt(_) => ValueKind::UInt,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Object(_) => ValueKind::Object,
            Value::List(_) => ValueKind::List,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Set(_) => ValueKind::Set,
            Value::Map(_) => ValueKind::Map,
            Value::Call(_) => ValueKind::Call,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the payload of any integer variant that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::UInt(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Returns the payload of any integer variant that fits in a `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(value) => Some(*value),
            Value::Int(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Returns a numeric payload widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            Value::UInt(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the object handle, if any.
    pub fn as_object(&self) -> Option<u64> {
        match self {
            Value::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Returns the embedded procedure call, if any.
    pub fn as_call(&self) -> Option<&ProcedureCall> {
        match self {
            Value::Call(call) => Some(call),
            _ => None,
        }
    }
}

/// Structural equality over values.
pub fn deep_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::UInt(a), Value::UInt(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => a == b,
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            sequence_eq(a, b)
        }
        (Value::Set(a), Value::Set(b)) => set_eq(a, b),
        (Value::Map(a), Value::Map(b)) => map_eq(a, b),
        (Value::Call(a), Value::Call(b)) => a == b,
        _ => false,
    }
}

fn sequence_eq(left: &[Value], right: &[Value]) -> bool {
    left.len() == right.len() && left.iter().zip(right).all(|(a, b)| deep_eq(a, b))
}

fn set_eq(left: &[Value], right: &[Value]) -> bool {
    let contains = |haystack: &[Value], needle: &Value| haystack.iter().any(|v| deep_eq(v, needle));
    left.len() == right.len()
        && left.iter().all(|v| contains(right, v))
        && right.iter().all(|v| contains(left, v))
}

fn map_eq(left: &[(Value, Value)], right: &[(Value, Value)]) -> bool {
    left.len() == right.len()
        && left.iter().all(|(key, value)| {
            right
                .iter()
                .find(|(other, _)| deep_eq(key, other))
                .is_some_and(|(_, other)| deep_eq(value, other))
        })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_eq(self, other)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<ProcedureCall> for Value {
    fn from(value: ProcedureCall) -> Self {
        Value::Call(value)
    }
}
