//! Request validation from per-field rules declared on the record.

use crate::error::EngineError;
use crate::schema::{FieldDescriptor, FieldsMapping};
use regex::Regex;
use serde_json::{Map, Value};

/// Validation rule attached to a field with `FieldBuilder::validate`. Rules see the wire value
/// before coercion; `null` only fails `Required`.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldRule {
    Required,
    NotEmpty,
    Email,
    MinLength(usize),
    MaxLength(usize),
    /// Regular expression the string value must match.
    Pattern(String),
    MinValue(f64),
    MaxValue(f64),
}

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a create body: every rule of every fillable field, `Required` included.
    pub fn validate(mapping: &FieldsMapping, body: &Map<String, Value>) -> Result<(), EngineError> {
        for desc in fillable(mapping) {
            let val = body.get(&desc.fill_name);
            for rule in &desc.rules {
                if *rule == FieldRule::Required && val.map_or(true, Value::is_null) {
                    return Err(EngineError::Validation(format!("{} is required", desc.fill_name)));
                }
            }
            if let Some(v) = val {
                validate_field(desc, v)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for PATCH). Required is not enforced for missing fields.
    pub fn validate_partial(mapping: &FieldsMapping, body: &Map<String, Value>) -> Result<(), EngineError> {
        for desc in fillable(mapping) {
            let Some(v) = body.get(&desc.fill_name) else { continue };
            if v.is_null() && desc.rules.contains(&FieldRule::Required) {
                return Err(EngineError::Validation(format!("{} is required", desc.fill_name)));
            }
            validate_field(desc, v)?;
        }
        Ok(())
    }
}

fn fillable(mapping: &FieldsMapping) -> impl Iterator<Item = &FieldDescriptor> {
    mapping.fillable.iter().filter_map(|n| mapping.field(n))
}

fn validate_field(desc: &FieldDescriptor, v: &Value) -> Result<(), EngineError> {
    if v.is_null() {
        return Ok(());
    }
    let col = desc.fill_name.as_str();
    let fail = |msg: String| Err(EngineError::Validation(msg));
    for rule in &desc.rules {
        match rule {
            FieldRule::Required => {}
            FieldRule::NotEmpty => {
                let empty = match v {
                    Value::String(s) => s.trim().is_empty(),
                    Value::Array(a) => a.is_empty(),
                    Value::Object(o) => o.is_empty(),
                    _ => false,
                };
                if empty {
                    return fail(format!("{} must not be empty", col));
                }
            }
            FieldRule::Email => {
                if let Some(s) = v.as_str() {
                    let valid = s
                        .split_once('@')
                        .map(|(user, domain)| !user.is_empty() && domain.contains('.') && !domain.ends_with('.'))
                        .unwrap_or(false);
                    if !valid {
                        return fail(format!("{} must be a valid email", col));
                    }
                }
            }
            FieldRule::MinLength(min) => {
                if let Some(s) = v.as_str() {
                    if s.chars().count() < *min {
                        return fail(format!("{} must be at least {} characters", col, min));
                    }
                }
            }
            FieldRule::MaxLength(max) => {
                if let Some(s) = v.as_str() {
                    if s.chars().count() > *max {
                        return fail(format!("{} must be at most {} characters", col, max));
                    }
                }
            }
            FieldRule::Pattern(pattern) => {
                let re = Regex::new(pattern)
                    .map_err(|_| EngineError::Validation(format!("invalid pattern for {}", col)))?;
                if let Some(s) = v.as_str() {
                    if !re.is_match(s) {
                        return fail(format!("{} does not match required pattern", col));
                    }
                }
            }
            FieldRule::MinValue(min) => {
                if let Some(n) = number(v) {
                    if n < *min {
                        return fail(format!("{} must be at least {}", col, min));
                    }
                }
            }
            FieldRule::MaxValue(max) => {
                if let Some(n) = number(v) {
                    if n > *max {
                        return fail(format!("{} must be at most {}", col, max));
                    }
                }
            }
        }
    }
    Ok(())
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, SchemaBuilder};
    use serde_json::json;

    fn mapping() -> FieldsMapping {
        let mut s = SchemaBuilder::new();
        s.table("users");
        s.field("Id", FieldKind::U64).primary_key();
        s.field("Email", FieldKind::String)
            .validate(FieldRule::Required)
            .validate(FieldRule::Email);
        s.field("Nick", FieldKind::String)
            .validate(FieldRule::MinLength(2))
            .validate(FieldRule::MaxLength(8))
            .validate(FieldRule::Pattern("^[a-z]+$".into()));
        s.field("Age", FieldKind::U8)
            .validate(FieldRule::MinValue(13.0))
            .validate(FieldRule::MaxValue(120.0));
        s.field("Bio", FieldKind::String).validate(FieldRule::NotEmpty);
        FieldsMapping::build("User", s).unwrap()
    }

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn create_requires_required_fields() {
        let m = mapping();
        let err = RequestValidator::validate(&m, &body(json!({"nick": "bob"}))).unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref msg) if msg == "email is required"));
        assert!(RequestValidator::validate(&m, &body(json!({"email": "a@b.io"}))).is_ok());
    }

    #[test]
    fn partial_skips_missing_required() {
        let m = mapping();
        assert!(RequestValidator::validate_partial(&m, &body(json!({"nick": "bob"}))).is_ok());
        assert!(RequestValidator::validate_partial(&m, &body(json!({"email": null}))).is_err());
    }

    #[test]
    fn field_rules() {
        let m = mapping();
        let check = |v: Value| RequestValidator::validate_partial(&m, &body(v));
        assert!(check(json!({"email": "nobody"})).is_err());
        assert!(check(json!({"nick": "b"})).is_err());
        assert!(check(json!({"nick": "abcdefghij"})).is_err());
        assert!(check(json!({"nick": "Bob"})).is_err());
        assert!(check(json!({"age": 12})).is_err());
        assert!(check(json!({"age": "121"})).is_err());
        assert!(check(json!({"age": 40})).is_ok());
        assert!(check(json!({"bio": "  "})).is_err());
        assert!(check(json!({"bio": "hi"})).is_ok());
    }
}
