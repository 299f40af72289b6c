//! Property values and their logical types.

use crate::error::{CoreError, CoreResult};
use crate::serializer::{Decode, Deserializer, Encode, Reader, Serializer};
use std::fmt;

/// Logical type of a property column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Blob,
}

impl LogicalType {
    /// Converts to the on-disk byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Bool => 1,
            Self::Int64 => 2,
            Self::Double => 3,
            Self::String => 4,
            Self::Blob => 5,
        }
    }

    /// Parses the on-disk byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Bool),
            2 => Some(Self::Int64),
            3 => Some(Self::Double),
            4 => Some(Self::String),
            5 => Some(Self::Blob),
            _ => None,
        }
    }

    /// Returns true if values of this type can serve as a primary key.
    #[must_use]
    pub const fn is_key_type(self) -> bool {
        matches!(self, Self::Int64 | Self::String)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "BOOL",
            Self::Int64 => "INT64",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::Blob => "BLOB",
        };
        f.write_str(name)
    }
}

/// A single property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value; conforms to every type.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the logical type, or `None` for `Null`.
    #[must_use]
    pub fn logical_type(&self) -> Option<LogicalType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(LogicalType::Bool),
            Self::Int64(_) => Some(LogicalType::Int64),
            Self::Double(_) => Some(LogicalType::Double),
            Self::String(_) => Some(LogicalType::String),
            Self::Blob(_) => Some(LogicalType::Blob),
        }
    }

    /// Returns true if this value may be stored in a column of type `ty`.
    #[must_use]
    pub fn conforms_to(&self, ty: LogicalType) -> bool {
        self.logical_type().is_none_or(|t| t == ty)
    }

    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl Encode for LogicalType {
    fn encode(&self, s: &mut Serializer) {
        s.write_u8(self.as_byte());
    }
}

impl Decode for LogicalType {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        let byte = d.read_u8()?;
        Self::from_byte(byte)
            .ok_or_else(|| CoreError::invalid_format(format!("unknown logical type {byte}")))
    }
}

impl Encode for Value {
    fn encode(&self, s: &mut Serializer) {
        match self {
            Self::Null => s.write_u8(0),
            Self::Bool(v) => {
                s.write_u8(LogicalType::Bool.as_byte());
                s.write_bool(*v);
            }
            Self::Int64(v) => {
                s.write_u8(LogicalType::Int64.as_byte());
                s.write_i64(*v);
            }
            Self::Double(v) => {
                s.write_u8(LogicalType::Double.as_byte());
                s.write_f64(*v);
            }
            Self::String(v) => {
                s.write_u8(LogicalType::String.as_byte());
                s.write_str(v);
            }
            Self::Blob(v) => {
                s.write_u8(LogicalType::Blob.as_byte());
                s.write_bytes(v);
            }
        }
    }
}

impl Decode for Value {
    fn decode<R: Reader>(d: &mut Deserializer<R>) -> CoreResult<Self> {
        let tag = d.read_u8()?;
        if tag == 0 {
            return Ok(Self::Null);
        }
        match LogicalType::from_byte(tag) {
            Some(LogicalType::Bool) => Ok(Self::Bool(d.read_bool()?)),
            Some(LogicalType::Int64) => Ok(Self::Int64(d.read_i64()?)),
            Some(LogicalType::Double) => Ok(Self::Double(d.read_f64()?)),
            Some(LogicalType::String) => Ok(Self::String(d.read_string()?)),
            Some(LogicalType::Blob) => Ok(Self::Blob(d.read_bytes()?)),
            None => Err(CoreError::invalid_format(format!("unknown value tag {tag}"))),
        }
    }
}
