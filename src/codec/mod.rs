//! FieldCodec: one wire value <-> one native field value, with range checks.

mod registry;
mod value;

pub use registry::{CodecExport, CodecFill, CodecRegistry, CustomCodec};
pub use value::{timestamp_from_epoch, FieldValue};

use crate::error::CodecError;
use crate::identity::DecisionLog;
use crate::recover::{panic_cause, take_stack};
use crate::schema::{FieldDescriptor, FieldKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Convert an external (wire) value into the native representation of `desc.kind`.
pub fn process_field_type(
    desc: &FieldDescriptor,
    value: &Value,
    codecs: &CodecRegistry,
    log: &mut DecisionLog,
) -> Result<FieldValue, CodecError> {
    let field = desc.fill_name.as_str();
    if value.is_null() {
        return if desc.nullable {
            Ok(FieldValue::Null)
        } else {
            Err(CodecError::invalid(field, "null is not allowed"))
        };
    }
    Ok(match &desc.kind {
        FieldKind::I8 => FieldValue::I8(narrow(field, "i8", wire_int(field, value)?)?),
        FieldKind::I16 => FieldValue::I16(narrow(field, "i16", wire_int(field, value)?)?),
        FieldKind::I32 => FieldValue::I32(narrow(field, "i32", wire_int(field, value)?)?),
        FieldKind::I64 => FieldValue::I64(narrow(field, "i64", wire_int(field, value)?)?),
        FieldKind::U8 => FieldValue::U8(narrow(field, "u8", wire_int(field, value)?)?),
        FieldKind::U16 => FieldValue::U16(narrow(field, "u16", wire_int(field, value)?)?),
        FieldKind::U32 => FieldValue::U32(narrow(field, "u32", wire_int(field, value)?)?),
        FieldKind::U64 => FieldValue::U64(narrow(field, "u64", wire_int(field, value)?)?),
        FieldKind::F64 => FieldValue::F64(wire_float(field, value)?),
        FieldKind::Bool => FieldValue::Bool(wire_bool(field, value)?),
        FieldKind::String => match value {
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Number(n) => FieldValue::String(n.to_string()),
            Value::Bool(b) => FieldValue::String(b.to_string()),
            _ => return Err(CodecError::invalid(field, "expected string")),
        },
        FieldKind::Timestamp => {
            let secs = narrow(field, "i64", wire_int(field, value)?)?;
            FieldValue::Timestamp(timestamp_from_epoch(field, secs)?)
        }
        FieldKind::IdList => {
            let items = value
                .as_array()
                .ok_or_else(|| CodecError::invalid(field, "expected array of ids"))?;
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                match item.as_u64() {
                    Some(id) => ids.push(id),
                    None => log.note(format!("field `{}`: skipped non-id list element {}", field, item)),
                }
            }
            FieldValue::IdList(ids)
        }
        FieldKind::Custom(type_name) => {
            let codec = codecs.get(type_name).ok_or_else(|| CodecError::UnsupportedFieldType {
                field: field.to_string(),
                type_name: type_name.clone(),
            })?;
            FieldValue::Custom(run_codec(field, codec.fill, value)?)
        }
    })
}

/// Native value -> wire value. Timestamps leave as Unix-epoch seconds.
pub fn export_field_value(
    desc: &FieldDescriptor,
    value: &FieldValue,
    codecs: &CodecRegistry,
) -> Result<Value, CodecError> {
    Ok(match value {
        FieldValue::Timestamp(t) => Value::from(t.timestamp()),
        FieldValue::Custom(v) => match &desc.kind {
            FieldKind::Custom(type_name) => {
                let codec = codecs.get(type_name).ok_or_else(|| CodecError::UnsupportedFieldType {
                    field: desc.export_name.clone(),
                    type_name: type_name.clone(),
                })?;
                run_codec(&desc.export_name, codec.export, v)?
            }
            _ => v.clone(),
        },
        other => other.to_storage(),
    })
}

/// Stored value (as read back from the store) -> native value.
pub fn stored_field_value(desc: &FieldDescriptor, value: &Value) -> Result<FieldValue, CodecError> {
    let field = desc.column.as_str();
    if value.is_null() {
        return Ok(match &desc.kind {
            FieldKind::IdList => FieldValue::IdList(Vec::new()),
            FieldKind::Custom(_) => FieldValue::Custom(Value::Null),
            _ => FieldValue::Null,
        });
    }
    Ok(match &desc.kind {
        FieldKind::Timestamp => match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| FieldValue::Timestamp(t.with_timezone(&Utc)))
                .map_err(|e| CodecError::invalid(field, format!("bad stored timestamp: {}", e)))?,
            other => {
                let secs = narrow(field, "i64", wire_int(field, other)?)?;
                FieldValue::Timestamp(timestamp_from_epoch(field, secs)?)
            }
        },
        FieldKind::IdList => {
            let parsed;
            let items = match value {
                Value::String(s) => {
                    parsed = serde_json::from_str::<Value>(s)
                        .map_err(|e| CodecError::invalid(field, format!("bad stored id list: {}", e)))?;
                    parsed.as_array()
                }
                other => other.as_array(),
            }
            .ok_or_else(|| CodecError::invalid(field, "stored id list is not an array"))?;
            FieldValue::IdList(items.iter().filter_map(Value::as_u64).collect())
        }
        FieldKind::Custom(_) => FieldValue::Custom(value.clone()),
        FieldKind::Bool => FieldValue::Bool(wire_bool(field, value)?),
        FieldKind::F64 => FieldValue::F64(wire_float(field, value)?),
        FieldKind::String => match value {
            Value::String(s) => FieldValue::String(s.clone()),
            other => FieldValue::String(other.to_string()),
        },
        FieldKind::I8 => FieldValue::I8(narrow(field, "i8", wire_int(field, value)?)?),
        FieldKind::I16 => FieldValue::I16(narrow(field, "i16", wire_int(field, value)?)?),
        FieldKind::I32 => FieldValue::I32(narrow(field, "i32", wire_int(field, value)?)?),
        FieldKind::I64 => FieldValue::I64(narrow(field, "i64", wire_int(field, value)?)?),
        FieldKind::U8 => FieldValue::U8(narrow(field, "u8", wire_int(field, value)?)?),
        FieldKind::U16 => FieldValue::U16(narrow(field, "u16", wire_int(field, value)?)?),
        FieldKind::U32 => FieldValue::U32(narrow(field, "u32", wire_int(field, value)?)?),
        FieldKind::U64 => FieldValue::U64(narrow(field, "u64", wire_int(field, value)?)?),
    })
}

fn run_codec(field: &str, f: fn(&Value) -> Result<Value, String>, value: &Value) -> Result<Value, CodecError> {
    match catch_unwind(AssertUnwindSafe(|| f(value))) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(msg)) => Err(CodecError::invalid(field, msg)),
        Err(payload) => Err(CodecError::Panicked {
            field: field.to_string(),
            cause: panic_cause(payload),
            stack: take_stack(),
        }),
    }
}

fn wire_int(field: &str, value: &Value) -> Result<i128, CodecError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i as i128)
            } else if let Some(u) = n.as_u64() {
                Ok(u as i128)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e38 {
                    Ok(f as i128)
                } else {
                    Err(CodecError::invalid(field, format!("expected integer, got {}", n)))
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| CodecError::invalid(field, format!("`{}` is not an integer", s))),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) | Value::Null => {
            Err(CodecError::invalid(field, "expected integer"))
        }
    }
}

fn narrow<T: TryFrom<i128>>(field: &str, kind: &'static str, v: i128) -> Result<T, CodecError> {
    T::try_from(v).map_err(|_| CodecError::NumberOverflow {
        field: field.to_string(),
        kind,
    })
}

fn wire_float(field: &str, value: &Value) -> Result<f64, CodecError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CodecError::invalid(field, "expected number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CodecError::invalid(field, format!("`{}` is not a number", s))),
        _ => Err(CodecError::invalid(field, "expected number")),
    }
}

fn wire_bool(field: &str, value: &Value) -> Result<bool, CodecError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(CodecError::invalid(field, format!("`{}` is not a bool", s))),
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(CodecError::invalid(field, format!("`{}` is not a bool", n))),
        },
        _ => Err(CodecError::invalid(field, "expected bool")),
    }
}
