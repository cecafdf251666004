//! Native field values exchanged between records, the converter and the store.

use crate::error::CodecError;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Bool(bool),
    String(String),
    Timestamp(DateTime<Utc>),
    IdList(Vec<u64>),
    /// Value produced by a registered custom codec, kept in its stored JSON form.
    Custom(Value),
}

macro_rules! int_accessor {
    ($name:ident, $t:ty) => {
        /// Any integer variant that fits the target width; `Null` is rejected.
        pub fn $name(&self, field: &str) -> Result<$t, CodecError> {
            let wide = self.as_wide_int().ok_or_else(|| {
                CodecError::invalid(field, format!("expected integer, got {}", self.kind_name()))
            })?;
            <$t>::try_from(wide).map_err(|_| CodecError::NumberOverflow {
                field: field.to_string(),
                kind: stringify!($t),
            })
        }
    };
}

impl FieldValue {
    int_accessor!(as_i8, i8);
    int_accessor!(as_i16, i16);
    int_accessor!(as_i32, i32);
    int_accessor!(as_i64, i64);
    int_accessor!(as_u8, u8);
    int_accessor!(as_u16, u16);
    int_accessor!(as_u32, u32);
    int_accessor!(as_u64, u64);

    fn as_wide_int(&self) -> Option<i128> {
        Some(match self {
            FieldValue::I8(v) => *v as i128,
            FieldValue::I16(v) => *v as i128,
            FieldValue::I32(v) => *v as i128,
            FieldValue::I64(v) => *v as i128,
            FieldValue::U8(v) => *v as i128,
            FieldValue::U16(v) => *v as i128,
            FieldValue::U32(v) => *v as i128,
            FieldValue::U64(v) => *v as i128,
            _ => return None,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::I8(_) => "i8",
            FieldValue::I16(_) => "i16",
            FieldValue::I32(_) => "i32",
            FieldValue::I64(_) => "i64",
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::U64(_) => "u64",
            FieldValue::F64(_) => "f64",
            FieldValue::Bool(_) => "bool",
            FieldValue::String(_) => "string",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::IdList(_) => "id_list",
            FieldValue::Custom(_) => "custom",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self, field: &str) -> Result<f64, CodecError> {
        match self {
            FieldValue::F64(v) => Ok(*v),
            other => other
                .as_wide_int()
                .map(|v| v as f64)
                .ok_or_else(|| CodecError::invalid(field, format!("expected number, got {}", other.kind_name()))),
        }
    }

    pub fn as_bool(&self, field: &str) -> Result<bool, CodecError> {
        match self {
            FieldValue::Bool(b) => Ok(*b),
            other => Err(CodecError::invalid(field, format!("expected bool, got {}", other.kind_name()))),
        }
    }

    pub fn into_string(self, field: &str) -> Result<String, CodecError> {
        match self {
            FieldValue::String(s) => Ok(s),
            other => Err(CodecError::invalid(field, format!("expected string, got {}", other.kind_name()))),
        }
    }

    pub fn into_timestamp(self, field: &str) -> Result<DateTime<Utc>, CodecError> {
        match self {
            FieldValue::Timestamp(t) => Ok(t),
            other => Err(CodecError::invalid(field, format!("expected timestamp, got {}", other.kind_name()))),
        }
    }

    pub fn into_id_list(self, field: &str) -> Result<Vec<u64>, CodecError> {
        match self {
            FieldValue::IdList(ids) => Ok(ids),
            FieldValue::Null => Ok(Vec::new()),
            other => Err(CodecError::invalid(field, format!("expected id list, got {}", other.kind_name()))),
        }
    }

    pub fn into_custom(self, field: &str) -> Result<Value, CodecError> {
        match self {
            FieldValue::Custom(v) => Ok(v),
            FieldValue::Null => Ok(Value::Null),
            other => Err(CodecError::invalid(field, format!("expected custom value, got {}", other.kind_name()))),
        }
    }

    /// Representation handed to the store: timestamps as RFC 3339, lists and custom values as JSON.
    pub fn to_storage(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::I8(v) => Value::from(*v),
            FieldValue::I16(v) => Value::from(*v),
            FieldValue::I32(v) => Value::from(*v),
            FieldValue::I64(v) => Value::from(*v),
            FieldValue::U8(v) => Value::from(*v),
            FieldValue::U16(v) => Value::from(*v),
            FieldValue::U32(v) => Value::from(*v),
            FieldValue::U64(v) => Value::from(*v),
            FieldValue::F64(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Timestamp(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            FieldValue::IdList(ids) => Value::Array(ids.iter().map(|id| Value::from(*id)).collect()),
            FieldValue::Custom(v) => v.clone(),
        }
    }
}

/// Unix-epoch seconds to a UTC timestamp.
pub fn timestamp_from_epoch(field: &str, secs: i64) -> Result<DateTime<Utc>, CodecError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| CodecError::invalid(field, format!("timestamp {} out of range", secs)))
}

macro_rules! from_native {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::$variant(v)
            }
        })*
    };
}

from_native!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f64 => F64, bool => Bool, String => String,
    DateTime<Utc> => Timestamp, Vec<u64> => IdList,
);

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}
