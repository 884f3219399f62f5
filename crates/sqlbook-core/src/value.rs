//! Dynamic SQL values.

use crate::error::{Error, TypeError};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// A dynamically-typed SQL value.
///
/// This enum represents all possible SQL values and is used
/// for parameter binding, result fetching and record field access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit unsigned integer
    ///
    /// Some backends reject unsigned parameters in row-identity predicates;
    /// see [`Value::to_signed`].
    Unsigned(u64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Time (microseconds since midnight)
    Time(i64),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// Timestamp with timezone (microseconds since epoch, UTC)
    TimestampTz(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Unsigned(_) => "UNSIGNED BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Whether this value is its type's zero value.
    ///
    /// Blank primary keys are filled from the backend after insert, and
    /// blank defaulted columns are left out of the INSERT.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(v) => !*v,
            Value::TinyInt(v) => *v == 0,
            Value::SmallInt(v) => *v == 0,
            Value::Int(v) => *v == 0,
            Value::BigInt(v) => *v == 0,
            Value::Unsigned(v) => *v == 0,
            Value::Float(v) => *v == 0.0,
            Value::Double(v) => *v == 0.0,
            Value::Decimal(s) | Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Date(v) => *v == 0,
            Value::Time(v) | Value::Timestamp(v) | Value::TimestampTz(v) => *v == 0,
            Value::Uuid(b) => b.iter().all(|byte| *byte == 0),
            Value::Json(j) => j.is_null(),
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::TinyInt(v) => Some(*v != 0),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            Value::Unsigned(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    ///
    /// Temporal values convert to their integer encoding.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Unsigned(v) => i64::try_from(*v).ok(),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            Value::Date(v) => Some(i64::from(*v)),
            Value::Time(v) | Value::Timestamp(v) | Value::TimestampTz(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::TinyInt(v) => Some(f64::from(*v)),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Unsigned(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Reinterpret an unsigned value as signed 64-bit.
    ///
    /// Values above `i64::MAX` are clamped with a warning. Every other
    /// variant is returned unchanged.
    #[must_use]
    pub fn to_signed(self) -> Self {
        match self {
            Value::Unsigned(v) => {
                if let Ok(signed) = i64::try_from(v) {
                    Value::BigInt(signed)
                } else {
                    tracing::warn!(
                        value = v,
                        clamped_to = i64::MAX,
                        "u64 value exceeds i64::MAX; clamping to i64::MAX"
                    );
                    Value::BigInt(i64::MAX)
                }
            }
            other => other,
        }
    }

    /// A microsecond timestamp, or NULL when `micros` is `None`.
    pub fn timestamp(micros: impl Into<Option<i64>>) -> Self {
        micros.into().map_or(Value::Null, Value::Timestamp)
    }

    /// Render this value for key comparison.
    ///
    /// Integers of every width, integral floats and numeric text all render
    /// to the same decimal string, so `Int(1)`, `BigInt(1)` and `Text("1")`
    /// compare equal as keys.
    pub fn key_fragment(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => v.to_string(),
            Value::TinyInt(v) => v.to_string(),
            Value::SmallInt(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::Unsigned(v) => v.to_string(),
            Value::Float(v) => f64::from(*v).to_string(),
            Value::Double(v) => v.to_string(),
            Value::Decimal(s) | Value::Text(s) => s.clone(),
            Value::Bytes(b) => hex(b),
            Value::Date(v) => v.to_string(),
            Value::Time(v) | Value::Timestamp(v) | Value::TimestampTz(v) => v.to_string(),
            Value::Uuid(b) => hex(b),
            Value::Json(j) => j.to_string(),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Render a (possibly composite) key tuple as a single comparable string.
pub fn key_string(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push('\u{1f}');
        }
        out.push_str(&value.key_fragment());
    }
    out
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Unsigned(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_i64().ok_or_else(|| {
            Error::Type(TypeError {
                expected: "i64",
                actual: value.type_name().to_string(),
                column: None,
            })
        })
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(v) | Value::Decimal(v) => Ok(v),
            other => Err(Error::Type(TypeError {
                expected: "String",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_integers() {
        assert_eq!(Value::from(42i8), Value::TinyInt(42));
        assert_eq!(Value::from(42i16), Value::SmallInt(42));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from(42i64), Value::BigInt(42));
        assert_eq!(Value::from(42u64), Value::Unsigned(42));
    }

    #[test]
    fn timestamp_from_plain_and_optional() {
        assert_eq!(Value::timestamp(5), Value::Timestamp(5));
        assert_eq!(Value::timestamp(Some(7)), Value::Timestamp(7));
        assert_eq!(Value::timestamp(None), Value::Null);
    }

    #[test]
    fn test_from_option() {
        let some: Value = Some(42i32).into();
        assert_eq!(some, Value::Int(42));

        let none: Value = Option::<i32>::None.into();
        assert_eq!(none, Value::Null);
    }

    #[test]
    fn test_is_blank() {
        assert!(Value::Null.is_blank());
        assert!(Value::Int(0).is_blank());
        assert!(Value::Text(String::new()).is_blank());
        assert!(Value::Uuid([0; 16]).is_blank());
        assert!(!Value::Int(7).is_blank());
        assert!(!Value::Text("x".into()).is_blank());
        assert!(!Value::Bool(true).is_blank());
    }

    #[test]
    fn test_key_fragment_tolerates_representation() {
        assert_eq!(Value::Int(1).key_fragment(), Value::BigInt(1).key_fragment());
        assert_eq!(Value::Unsigned(1).key_fragment(), Value::Text("1".into()).key_fragment());
        assert_eq!(Value::Double(1.0).key_fragment(), "1");
    }

    #[test]
    fn test_key_string_composite() {
        let a = key_string(&[Value::Int(1), Value::Text("x".into())]);
        let b = key_string(&[Value::BigInt(1), Value::Text("x".into())]);
        let c = key_string(&[Value::BigInt(1), Value::Text("y".into())]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_to_signed() {
        assert_eq!(Value::Unsigned(5).to_signed(), Value::BigInt(5));
        assert_eq!(Value::Unsigned(u64::MAX).to_signed(), Value::BigInt(i64::MAX));
        assert_eq!(Value::Text("a".into()).to_signed(), Value::Text("a".into()));
    }

    #[test]
    fn test_as_i64_temporal() {
        assert_eq!(Value::Timestamp(10).as_i64(), Some(10));
        assert_eq!(Value::Unsigned(u64::MAX).as_i64(), None);
        assert_eq!(Value::Text("1".into()).as_i64(), None);
    }
}
