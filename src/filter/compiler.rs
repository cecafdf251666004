//! FilterCompiler: filter document + list parameters -> parameterized conditions, joins and paging.

use crate::codec::{process_field_type, CodecRegistry, FieldValue};
use crate::config::{EngineConfig, ListConfig};
use crate::error::{CodecError, EngineError};
use crate::filter::{Condition, FilterOp, JoinClause};
use crate::identity::{DecisionLog, RequestContext};
use crate::recover::panic_cause;
use crate::schema::{FieldDescriptor, FieldKind, FieldsMapping};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Query-string parameters of a list request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListParams {
    /// JSON filter document.
    pub filter: Option<String>,
    pub sort_field: Option<String>,
    /// 1 ascending, -1 descending.
    pub order: i64,
    pub page: i64,
    pub per_page: i64,
    /// Predefined query name; replaces `filter` when present.
    pub query: Option<String>,
    /// JSON arguments for the predefined query.
    pub query_args: Option<String>,
}

impl ListParams {
    /// Parsed `filter` document. Absent or blank is an empty document.
    pub fn filter_document(&self) -> Result<Map<String, Value>, EngineError> {
        match self.filter.as_deref().map(str::trim) {
            None | Some("") => Ok(Map::new()),
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(EngineError::Validation("filter must be a JSON object".into())),
                Err(e) => Err(EngineError::Validation(format!("malformed filter: {}", e))),
            },
        }
    }
}

/// Input transform for a has-many filter value, applied before coercion.
pub type InputTransformer = fn(&Value) -> Result<Value, String>;

/// A filter key that targets a related table instead of a direct field: rows are kept when a
/// related row with `<related_table>.<parent_column> = <this>.<pk>` matches the value on
/// `<related_table>.<value_column>`.
#[derive(Clone, Debug)]
pub struct HasManyFilter {
    pub name: String,
    pub related_table: String,
    pub parent_column: String,
    pub value_column: String,
    pub transform: Option<InputTransformer>,
}

impl HasManyFilter {
    pub fn new(name: &str, related_table: &str, parent_column: &str, value_column: &str) -> Self {
        HasManyFilter {
            name: name.to_string(),
            related_table: related_table.to_string(),
            parent_column: parent_column.to_string(),
            value_column: value_column.to_string(),
            transform: None,
        }
    }

    pub fn transform(mut self, f: InputTransformer) -> Self {
        self.transform = Some(f);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub column: String,
    pub descending: bool,
}

/// Result of compiling one list request. Built fresh per request.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledFilter {
    pub table: String,
    pub id_column: String,
    pub conditions: Vec<Condition>,
    pub joins: Vec<JoinClause>,
    pub page: u64,
    pub per_page: u64,
    pub limit: u64,
    pub offset: u64,
    pub sort: Option<SortSpec>,
}

impl CompiledFilter {
    /// Columns are table-qualified once a join is present.
    pub fn qualified(&self) -> bool {
        !self.joins.is_empty()
    }

    /// AND-joined condition string with `?` placeholders.
    pub fn condition_sql(&self) -> String {
        let q = self.qualified();
        self.conditions.iter().map(|c| c.render(q)).collect::<Vec<_>>().join(" AND ")
    }

    /// Bound arguments in placeholder order.
    pub fn args(&self) -> Vec<FieldValue> {
        self.conditions.iter().flat_map(|c| c.bound_args().iter().cloned()).collect()
    }

    pub fn pages(&self, total: u64) -> u64 {
        if self.per_page == 0 {
            0
        } else {
            total.div_ceil(self.per_page)
        }
    }
}

/// Largest OFFSET a store is asked for (the range of a Postgres bigint).
const MAX_OFFSET: u64 = i64::MAX as u64;

/// Borrowed view over everything a list compilation consults.
pub struct FilterCompiler<'a> {
    pub mapping: &'a FieldsMapping,
    pub list: &'a ListConfig,
    pub engine: &'a EngineConfig,
    pub codecs: &'a CodecRegistry,
}

impl<'a> FilterCompiler<'a> {
    pub fn compile(
        &self,
        mut doc: Map<String, Value>,
        params: &ListParams,
        ctx: &mut RequestContext,
    ) -> Result<CompiledFilter, EngineError> {
        let mapping = self.mapping;
        let table = mapping.table.as_str();
        let is_admin = ctx.identity.is_admin;
        let mut conditions = Vec::new();

        if let Some(sd) = mapping.soft_delete_field() {
            if !is_admin || !doc.contains_key(&sd.fill_name) {
                doc.remove(&sd.fill_name);
                ctx.log.note(format!("soft delete `{}` forced to false", sd.fill_name));
                conditions.push(Condition::eq(table, &sd.column, false));
            } else {
                ctx.log.note(format!("soft delete `{}` requested explicitly", sd.fill_name));
            }
        }

        if let Some(owner) = mapping.owner_field() {
            if !is_admin {
                let Some(uid) = ctx.identity.authorized_user_id else {
                    ctx.log.note("owner scoping impossible: caller has no authorized id");
                    return Err(EngineError::NoAccess);
                };
                doc.remove(&owner.fill_name);
                ctx.log.note(format!("user reference `{}` set to {}", owner.fill_name, uid));
                conditions.push(owner_condition(table, owner, uid)?);
            }
        }

        let mut complex = Vec::new();
        for (key, value) in doc {
            let Some(desc) = mapping.by_fill_name(&key) else {
                match self.list.has_many_filter(&key) {
                    Some(hm) => {
                        ctx.log.note(format!("`{}` is a has-many filter, deferred", key));
                        complex.push((hm, value));
                    }
                    None => ctx.log.note(format!("`{}` is not a known field, skipped", key)),
                }
                continue;
            };
            if !is_admin && !mapping.is_filterable(&key) {
                ctx.log.note(format!("`{}` is not filterable, skipped", key));
                continue;
            }
            if self.list.is_disabled(&key) {
                ctx.log.note(format!("filter by `{}` is disabled by config", key));
                continue;
            }
            match condition_for(table, desc, &value, self.codecs, &mut ctx.log) {
                Ok(c) => conditions.push(c),
                Err(e) => ctx.log.note(format!("unable to process filter `{}`: {}", key, e)),
            }
        }

        let mut joins: Vec<JoinClause> = Vec::new();
        for (hm, value) in complex {
            let codecs = self.codecs;
            let log = &mut ctx.log;
            let outcome = catch_unwind(AssertUnwindSafe(|| has_many_condition(hm, &value, codecs, log)));
            match outcome {
                Ok(Ok(c)) => {
                    if !joins.iter().any(|j| j.table == hm.related_table) {
                        joins.push(JoinClause {
                            table: hm.related_table.clone(),
                            column: hm.parent_column.clone(),
                            parent_table: table.to_string(),
                            parent_column: mapping.primary().column.clone(),
                        });
                    }
                    conditions.push(c);
                }
                Ok(Err(e)) => ctx.log.note(format!("unable to generate has-many filter `{}`: {}", hm.name, e)),
                Err(payload) => ctx.log.note(format!(
                    "has-many filter `{}` disabled after panic: {}",
                    hm.name,
                    panic_cause(payload)
                )),
            }
        }

        let page = params.page.max(1) as u64;
        let per_page = if params.per_page > 0 {
            params.per_page as u64
        } else {
            self.list.per_page.unwrap_or(self.engine.default_per_page)
        }
        .clamp(1, self.engine.max_per_page.max(1));

        let sort = match params.sort_field.as_deref().filter(|s| !s.is_empty()) {
            None => None,
            Some(field) => match mapping.by_fill_name(field).filter(|_| mapping.is_filterable(field)) {
                Some(desc) => Some(SortSpec {
                    column: desc.column.clone(),
                    descending: params.order == -1,
                }),
                None => {
                    ctx.log.note(format!("sort by `{}` is not allowed, dropped", field));
                    None
                }
            },
        };

        let compiled = CompiledFilter {
            table: table.to_string(),
            id_column: mapping.primary().column.clone(),
            conditions,
            joins,
            page,
            per_page,
            limit: per_page,
            offset: (page - 1).saturating_mul(per_page).min(MAX_OFFSET),
            sort,
        };
        ctx.log.note(format!(
            "filter SQL: `{}` + args {:?}",
            compiled.condition_sql(),
            compiled.args()
        ));
        Ok(compiled)
    }
}

/// Identity filter plus owner/soft-delete scoping, as used by item routes. Admins get the
/// "not deleted" default and no owner restriction.
pub fn scope_conditions(
    mapping: &FieldsMapping,
    id: &FieldValue,
    ctx: &mut RequestContext,
) -> Result<Vec<Condition>, EngineError> {
    let table = mapping.table.as_str();
    let pk = mapping.primary();
    let mut conditions = vec![Condition::eq(table, &pk.column, id.clone()).with_cast(pk.kind.bind_cast())];
    if let Some(sd) = mapping.soft_delete_field() {
        conditions.push(Condition::eq(table, &sd.column, false));
    }
    if let Some(owner) = mapping.owner_field() {
        if !ctx.identity.is_admin {
            let uid = ctx.identity.authorized_user_id.ok_or(EngineError::NoAccess)?;
            conditions.push(owner_condition(table, owner, uid)?);
        }
    }
    ctx.log.note(format!(
        "item scope: `{}`",
        conditions.iter().map(|c| c.render(false)).collect::<Vec<_>>().join(" AND ")
    ));
    Ok(conditions)
}

fn owner_condition(table: &str, owner: &FieldDescriptor, uid: u64) -> Result<Condition, EngineError> {
    Ok(Condition::eq(table, &owner.column, owner_value(owner, uid)?).with_cast(owner.kind.bind_cast()))
}

/// The caller's user id in the owner field's native kind. An id the kind cannot hold owns nothing.
pub(crate) fn owner_value(owner: &FieldDescriptor, uid: u64) -> Result<FieldValue, EngineError> {
    Ok(match owner.kind {
        FieldKind::String => FieldValue::String(uid.to_string()),
        FieldKind::I64 => FieldValue::I64(i64::try_from(uid).map_err(|_| EngineError::NoAccess)?),
        _ => FieldValue::U64(uid),
    })
}

/// Compile one `(field, value)` pair: operator objects pick their operator, anything else is equality.
pub fn condition_for(
    table: &str,
    desc: &FieldDescriptor,
    value: &Value,
    codecs: &CodecRegistry,
    log: &mut DecisionLog,
) -> Result<Condition, CodecError> {
    let (op, operand) = match value.as_object().and_then(|o| o.get("op").map(|op| (o, op))) {
        Some((obj, op)) => {
            let name = op.as_str().unwrap_or_default();
            let op = FilterOp::parse(name).ok_or_else(|| {
                CodecError::invalid(&desc.fill_name, format!("filter op `{}` is not supported", name))
            })?;
            (op, obj.get("v").unwrap_or(&Value::Null))
        }
        None => (FilterOp::Eq, value),
    };

    let args = match op {
        _ if operand.is_null() && matches!(op, FilterOp::Eq | FilterOp::Ne) => vec![FieldValue::Null],
        FilterOp::In => {
            let items = operand
                .as_array()
                .ok_or_else(|| CodecError::invalid(&desc.fill_name, "`in` expects an array"))?;
            items
                .iter()
                .map(|v| process_field_type(desc, v, codecs, log))
                .collect::<Result<Vec<_>, _>>()?
        }
        FilterOp::Lookup => {
            if desc.kind != FieldKind::String {
                return Err(CodecError::invalid(&desc.fill_name, "`lookup` needs a string field"));
            }
            let needle = match process_field_type(desc, operand, codecs, log)? {
                FieldValue::String(s) => s,
                other => return Err(CodecError::invalid(&desc.fill_name, format!("bad lookup value {:?}", other))),
            };
            vec![FieldValue::String(format!("%{}%", escape_like(&needle)))]
        }
        _ => vec![process_field_type(desc, operand, codecs, log)?],
    };
    Ok(Condition::new(table, &desc.column, op, args).with_cast(desc.kind.bind_cast()))
}

/// Escape `LIKE` metacharacters so the needle matches literally under `ESCAPE '\'`.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn has_many_condition(
    hm: &HasManyFilter,
    raw: &Value,
    codecs: &CodecRegistry,
    log: &mut DecisionLog,
) -> Result<Condition, CodecError> {
    let value = match hm.transform {
        Some(f) => {
            log.note(format!("has-many filter `{}` applies its input transformer", hm.name));
            f(raw).map_err(|e| CodecError::invalid(&hm.name, e))?
        }
        None => raw.clone(),
    };
    let mut desc = FieldDescriptor::new(&hm.value_column, FieldKind::U64);
    desc.fill_name = hm.name.clone();
    desc.column = hm.value_column.clone();
    condition_for(&hm.related_table, &desc, &value, codecs, log)
}
