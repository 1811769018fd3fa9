//! Typed scalar values for snapshot rows.
//!
//! Every cell of a loaded table is a [`Value`]. Foreign-key membership is
//! decided on [`KeyValue`], a hashable normalization of non-null values.

use std::fmt;

use chrono::NaiveDateTime;

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value.
    Null,

    /// 64-bit signed integer.
    Int(i64),

    /// Double precision float.
    Float(f64),

    /// Text.
    Text(String),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Boolean.
    Bool(bool),
}

/// One row: values positionally aligned with the table's column list.
pub type Row = Vec<Value>;

impl Value {
    /// Check if this value is NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The integer an `Int` or integral `Float` holds.
    pub fn as_integral(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 => {
                Some(*v as i64)
            }
            _ => None,
        }
    }

    /// Normalized key for membership tests, `None` for NULL.
    ///
    /// Integral floats collapse to `Int` so that a float-typed foreign key
    /// column (`5.0`, common when the column has blanks) matches `Id = 5`.
    pub fn key(&self) -> Option<KeyValue> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(KeyValue::Int(*v)),
            Value::Float(v) if v.is_nan() => None,
            Value::Float(v) => Some(
                self.as_integral()
                    .map_or(KeyValue::FloatBits(v.to_bits()), KeyValue::Int),
            ),
            Value::Text(s) => Some(KeyValue::Text(s.clone())),
            Value::Timestamp(t) => Some(KeyValue::Timestamp(*t)),
            Value::Bool(b) => Some(KeyValue::Bool(*b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.6f")),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Hashable form of a non-null [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int(i64),
    FloatBits(u64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bool(bool),
}
