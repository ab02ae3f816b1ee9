use serde::{Deserialize, Serialize};

/// A dynamically typed field value.
///
/// The closed set of kinds syncable objects and events may carry.
/// Integers narrower than 64 bits widen to `Int` on the wire; narrowing
/// back is the reader's job via [`TaggedValue::as_i32`], driven by the
/// schema it declared for the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaggedValue {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl TaggedValue {
    /// True for the `Null` kind.
    pub fn is_null(&self) -> bool {
        matches!(self, TaggedValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TaggedValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Narrow to `i32`. Returns `None` for non-integers and for values
    /// outside the 32-bit range.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            TaggedValue::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TaggedValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TaggedValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TaggedValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for TaggedValue {
    fn from(v: &str) -> Self {
        TaggedValue::String(v.to_string())
    }
}

impl From<String> for TaggedValue {
    fn from(v: String) -> Self {
        TaggedValue::String(v)
    }
}

impl From<i32> for TaggedValue {
    fn from(v: i32) -> Self {
        TaggedValue::Int(v as i64)
    }
}

impl From<i64> for TaggedValue {
    fn from(v: i64) -> Self {
        TaggedValue::Int(v)
    }
}

impl From<f64> for TaggedValue {
    fn from(v: f64) -> Self {
        TaggedValue::Float(v)
    }
}

impl From<bool> for TaggedValue {
    fn from(v: bool) -> Self {
        TaggedValue::Bool(v)
    }
}

impl From<Vec<u8>> for TaggedValue {
    fn from(v: Vec<u8>) -> Self {
        TaggedValue::Bytes(v)
    }
}
