//! RecordConverter: fill a record from an external document, export it back, and move it in and
//! out of store rows.

use crate::codec::{export_field_value, process_field_type, stored_field_value, CodecRegistry};
use crate::error::EngineError;
use crate::identity::RequestContext;
use crate::recover::recovered;
use crate::schema::{FieldsMapping, Record, RecordSchema};
use crate::store::Row;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Fill `record` from `doc`. Absent keys leave the field untouched; a field that fails to decode
/// is logged and skipped. Returns the declared names of the fields that were assigned.
pub fn fill_from_external<R: Record>(
    schema: &RecordSchema<R>,
    record: &mut R,
    doc: &Map<String, Value>,
    codecs: &CodecRegistry,
    ctx: &mut RequestContext,
) -> Result<Vec<String>, EngineError> {
    let mapping = &schema.mapping;
    let mut assigned = Vec::new();

    for name in &mapping.fillable {
        let Some(desc) = mapping.field(name) else { continue };
        if desc.min_write_role != 0 && desc.min_write_role != ctx.identity.role_group {
            ctx.log.note(format!(
                "fill: `{}` skipped, requires role group {} (caller has {})",
                desc.fill_name, desc.min_write_role, ctx.identity.role_group
            ));
            continue;
        }
        let Some(raw) = doc.get(&desc.fill_name) else { continue };

        let value = match process_field_type(desc, raw, codecs, &mut ctx.log) {
            Ok(v) => v,
            Err(e) => {
                ctx.log.note(format!("fill: `{}` skipped: {}", desc.fill_name, e));
                continue;
            }
        };
        if let Err(e) = record.set(&desc.name, value) {
            ctx.log.note(format!("fill: `{}` not assigned: {}", desc.fill_name, e));
            continue;
        }
        assigned.push(desc.name.clone());
    }

    if let Some(custom) = schema.capabilities.fill {
        let identity = &ctx.identity;
        match catch_unwind(AssertUnwindSafe(|| custom(record, doc, identity))) {
            Ok(res) => res?,
            Err(payload) => {
                return Err(recovered(format_args!("custom fill of {}", mapping.type_name), payload))
            }
        }
    }
    Ok(assigned)
}

/// Export `record` for the caller. Admin-only fields are omitted entirely for non-admins.
pub fn export_to_external<R: Record>(
    schema: &RecordSchema<R>,
    record: &R,
    codecs: &CodecRegistry,
    ctx: &mut RequestContext,
) -> Result<Map<String, Value>, EngineError> {
    let mapping = &schema.mapping;
    let mut doc = Map::new();
    for name in &mapping.outable {
        let Some(desc) = mapping.field(name) else { continue };
        if desc.admin_only && !ctx.identity.is_admin {
            continue;
        }
        let Some(value) = record.get(&desc.name) else {
            ctx.log.note(format!("export: `{}` has no value accessor", desc.name));
            continue;
        };
        match export_field_value(desc, &value, codecs) {
            Ok(v) => {
                doc.insert(desc.export_name.clone(), v);
            }
            Err(e) => ctx.log.note(format!("export: `{}` skipped: {}", desc.export_name, e)),
        }
    }

    match schema.capabilities.export {
        None => Ok(doc),
        Some(custom) => {
            let identity = &ctx.identity;
            match catch_unwind(AssertUnwindSafe(|| custom(record, doc, identity))) {
                Ok(res) => res,
                Err(payload) => Err(recovered(format_args!("custom export of {}", mapping.type_name), payload)),
            }
        }
    }
}

/// Hydrate a record from a stored row. Columns missing from the row keep their default.
pub fn record_from_row<R: Record>(mapping: &FieldsMapping, row: &Row) -> Result<R, EngineError> {
    let mut record = R::default();
    for desc in mapping.valid_fields() {
        let Some(raw) = row.get(&desc.column) else { continue };
        let value = stored_field_value(desc, raw)?;
        if value.is_null() && !desc.nullable {
            continue;
        }
        record.set(&desc.name, value)?;
    }
    Ok(record)
}

/// Storage row (column -> stored value) for the given declared field names.
pub fn record_to_row<'a, R: Record>(
    mapping: &FieldsMapping,
    record: &R,
    fields: impl IntoIterator<Item = &'a str>,
) -> Row {
    let mut row = Row::new();
    for name in fields {
        let Some(desc) = mapping.field(name) else { continue };
        if let Some(value) = record.get(&desc.name) {
            row.insert(desc.column.clone(), value.to_storage());
        }
    }
    row
}

/// Declared names of every stored field, primary key included.
pub fn stored_fields(mapping: &FieldsMapping) -> Vec<&str> {
    mapping.valid_fields().map(|f| f.name.as_str()).collect()
}
