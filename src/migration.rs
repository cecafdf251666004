//! DDL for record tables and relation tables, derived from registered mappings.

use crate::error::StoreError;
use crate::schema::{FieldKind, FieldsMapping};
use sqlx::PgPool;
use std::collections::HashMap;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Column -> PostgreSQL type for every valid field of the mapping.
pub fn column_types(mapping: &FieldsMapping) -> HashMap<String, &'static str> {
    mapping
        .valid_fields()
        .map(|f| (f.column.clone(), f.kind.pg_type()))
        .collect()
}

/// `CREATE TABLE IF NOT EXISTS` statement for a record type.
pub fn create_table_sql(mapping: &FieldsMapping) -> String {
    let mut col_defs = Vec::new();
    for f in mapping.valid_fields() {
        let def = if f.primary_key {
            let typ = match f.kind {
                FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::U8 | FieldKind::U16 => "SERIAL",
                _ if f.kind.is_integer() => "BIGSERIAL",
                _ => f.kind.pg_type(),
            };
            format!("{} {} PRIMARY KEY", quote(&f.column), typ)
        } else {
            let mut def = format!("{} {}", quote(&f.column), f.kind.pg_type());
            if !f.nullable {
                def.push_str(" NOT NULL");
                if let Some(d) = column_default(&f.kind) {
                    def.push_str(" DEFAULT ");
                    def.push_str(d);
                }
            }
            def
        };
        col_defs.push(def);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quote(&mapping.table),
        col_defs.join(",\n  ")
    )
}

fn column_default(kind: &FieldKind) -> Option<&'static str> {
    match kind {
        k if k.is_integer() => Some("0"),
        FieldKind::F64 => Some("0"),
        FieldKind::Bool => Some("FALSE"),
        FieldKind::String => Some("''"),
        FieldKind::Timestamp => Some("NOW()"),
        FieldKind::IdList => Some("'[]'::jsonb"),
        _ => None,
    }
}

pub fn create_relation_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  \"id\" BIGSERIAL PRIMARY KEY,\n  \"user_id\" BIGINT NOT NULL,\n  \
         \"object_id\" BIGINT NOT NULL,\n  \"role\" SMALLINT NOT NULL DEFAULT 0\n)",
        quote(table)
    )
}

/// Create the record table if missing. Existing tables are left as they are.
pub async fn ensure_table(pool: &PgPool, mapping: &FieldsMapping) -> Result<(), StoreError> {
    let sql = create_table_sql(mapping);
    tracing::debug!(%sql, "ensure table");
    sqlx::query(&sql).execute(pool).await?;
    tracing::info!(table = %mapping.table, "table ready");
    Ok(())
}

/// Create a `(user_id, object_id, role)` relation table plus its lookup index.
pub async fn ensure_relation_table(pool: &PgPool, table: &str) -> Result<(), StoreError> {
    sqlx::query(&create_relation_table_sql(table)).execute(pool).await?;
    let index = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (\"object_id\", \"user_id\")",
        quote(&format!("{}_object_user_idx", table)),
        quote(table)
    );
    sqlx::query(&index).execute(pool).await?;
    tracing::info!(table = %table, "relation table ready");
    Ok(())
}
