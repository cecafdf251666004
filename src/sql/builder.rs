//! Builds parameterized PostgreSQL statements from structured conditions and rows.

use crate::filter::Condition;
use crate::store::{ListQuery, Row};
use serde_json::Value;
use std::collections::HashMap;

/// table -> column -> PostgreSQL type, used to cast bound parameters.
pub type ColumnTypes = HashMap<String, HashMap<String, &'static str>>;

/// Quote identifier for PostgreSQL (names come from record declarations, never from requests).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quoted(table), quoted(column))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value, cast: Option<&str>) -> String {
        self.params.push(v);
        let n = self.params.len();
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

fn column_cast<'a>(types: &'a ColumnTypes, table: &str, column: &str) -> Option<&'a str> {
    types.get(table).and_then(|cols| cols.get(column)).copied()
}

/// Render conditions into ` WHERE ...` (or nothing), appending their arguments.
fn where_clause(q: &mut QueryBuf, conditions: &[Condition], types: &ColumnTypes) -> String {
    let mut parts = Vec::with_capacity(conditions.len());
    for c in conditions {
        let cast = column_cast(types, &c.table, &c.column).or(c.cast);
        let mut pending = c.storage_args().into_iter();
        let part = c.render_expr(&qualified(&c.table, &c.column), || {
            q.push_param(pending.next().unwrap_or(Value::Null), cast)
        });
        parts.push(part);
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn from_with_joins(query: &ListQuery) -> String {
    let mut from = quoted(&query.table);
    for j in &query.joins {
        from.push_str(&format!(
            " INNER JOIN {} ON {} = {}",
            quoted(&j.table),
            qualified(&j.table, &j.column),
            qualified(&j.parent_table, &j.parent_column)
        ));
    }
    from
}

/// SELECT COUNT(DISTINCT id) over the filtered (and joined) rows.
pub fn count(query: &ListQuery, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, &query.conditions, types);
    q.sql = format!(
        "SELECT COUNT(DISTINCT {}) FROM {}{}",
        qualified(&query.table, &query.id_column),
        from_with_joins(query),
        where_sql
    );
    q
}

/// SELECT DISTINCT id (plus the sort column, which DISTINCT requires in the select list).
pub fn select_ids(query: &ListQuery, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, &query.conditions, types);
    let id = qualified(&query.table, &query.id_column);
    let (select, order) = match &query.sort {
        Some(s) if s.column != query.id_column => {
            let col = qualified(&query.table, &s.column);
            let dir = if s.descending { "DESC" } else { "ASC" };
            (format!("{}, {}", id, col), format!("{} {}, {} ASC", col, dir, id))
        }
        Some(s) => (id.clone(), format!("{} {}", id, if s.descending { "DESC" } else { "ASC" })),
        None => (id.clone(), format!("{} ASC", id)),
    };
    let limit = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset = if query.offset > 0 {
        format!(" OFFSET {}", query.offset)
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT DISTINCT {} FROM {}{} ORDER BY {}{}{}",
        select,
        from_with_joins(query),
        where_sql,
        order,
        limit,
        offset
    );
    q
}

/// SELECT * with optional ORDER BY and LIMIT.
pub fn select_where(
    table: &str,
    conditions: &[Condition],
    order_by: Option<&str>,
    limit: Option<u64>,
    types: &ColumnTypes,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, conditions, types);
    let order = order_by.map(|c| format!(" ORDER BY {}", quoted(c))).unwrap_or_default();
    let limit = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    q.sql = format!("SELECT * FROM {}{}{}{}", quoted(table), where_sql, order, limit);
    q
}

/// INSERT ... RETURNING *. Uses SQL casts from the registered column types so timestamp and
/// JSON values bind correctly.
pub fn insert(table: &str, row: &Row, types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    if row.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quoted(table));
        return q;
    }
    let mut cols = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    for (col, val) in row {
        cols.push(quoted(col));
        placeholders.push(q.push_param(val.clone(), column_cast(types, table, col)));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        quoted(table),
        cols.join(", "),
        placeholders.join(", ")
    );
    q
}

/// UPDATE ... SET only the given columns. `None` when there is nothing to set.
pub fn update(table: &str, conditions: &[Condition], row: &Row, types: &ColumnTypes) -> Option<QueryBuf> {
    if row.is_empty() {
        return None;
    }
    let mut q = QueryBuf::new();
    let mut sets = Vec::with_capacity(row.len());
    for (col, val) in row {
        let ph = q.push_param(val.clone(), column_cast(types, table, col));
        sets.push(format!("{} = {}", quoted(col), ph));
    }
    let where_sql = where_clause(&mut q, conditions, types);
    q.sql = format!("UPDATE {} SET {}{}", quoted(table), sets.join(", "), where_sql);
    Some(q)
}

pub fn delete(table: &str, conditions: &[Condition], types: &ColumnTypes) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, conditions, types);
    q.sql = format!("DELETE FROM {}{}", quoted(table), where_sql);
    q
}
