//! In-process store: tables of JSON rows. Used by the demo without `DATABASE_URL` and by tests.

use crate::error::StoreError;
use crate::filter::{Condition, FilterOp, JoinClause};
use crate::store::{ListQuery, Row, Store, StoreTx};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

type Tables = HashMap<String, Vec<Row>>;

static NULL: Value = Value::Null;

/// Transactions hold the write lock until commit or rollback, so they are serialized.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_table(&self, name: &str) {
        self.tables.write().await.entry(name.to_string()).or_default();
    }

    /// Snapshot of a table's rows, mainly for assertions.
    pub async fn rows(&self, name: &str) -> Vec<Row> {
        self.tables.read().await.get(name).cloned().unwrap_or_default()
    }

    async fn matching(&self, query: &ListQuery) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().await;
        let rows = table(&tables, &query.table)?;
        let mut out = Vec::new();
        for row in rows {
            if row_matches(&tables, &query.table, row, &query.conditions, &query.joins)? {
                out.push(row.clone());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().write_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn count(&self, query: &ListQuery) -> Result<u64, StoreError> {
        Ok(self.matching(query).await?.len() as u64)
    }

    async fn select_ids(&self, query: &ListQuery) -> Result<Vec<Value>, StoreError> {
        let mut rows = self.matching(query).await?;
        if let Some(sort) = &query.sort {
            rows.sort_by(|a, b| {
                let ord = compare_cells(cell(a, &sort.column), cell(b, &sort.column));
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(usize::try_from(query.offset).unwrap_or(usize::MAX))
            .take(limit)
            .map(|r| cell(&r, &query.id_column).clone())
            .collect())
    }

    async fn find_first(&self, table_name: &str, conditions: &[Condition]) -> Result<Option<Row>, StoreError> {
        let tables = self.tables.read().await;
        first_match(&tables, table_name, conditions)
    }

    async fn find_all(
        &self,
        table_name: &str,
        conditions: &[Condition],
        order_by: Option<&str>,
    ) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().await;
        let mut out = Vec::new();
        for row in table(&tables, table_name)? {
            if row_matches(&tables, table_name, row, conditions, &[])? {
                out.push(row.clone());
            }
        }
        if let Some(column) = order_by {
            out.sort_by(|a, b| compare_cells(cell(a, column), cell(b, column)));
        }
        Ok(out)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedRwLockWriteGuard<Tables>,
    staged: Tables,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert(&mut self, table_name: &str, pk_column: &str, mut row: Row) -> Result<Row, StoreError> {
        let rows = self
            .staged
            .get_mut(table_name)
            .ok_or_else(|| StoreError::UnknownTable(table_name.to_string()))?;
        let needs_id = match row.get(pk_column) {
            None | Some(Value::Null) => true,
            Some(v) => v.as_u64() == Some(0),
        };
        if needs_id {
            let next = rows
                .iter()
                .filter_map(|r| r.get(pk_column).and_then(Value::as_u64))
                .max()
                .unwrap_or(0)
                + 1;
            row.insert(pk_column.to_string(), Value::from(next));
        } else if rows.iter().any(|r| r.get(pk_column) == row.get(pk_column)) {
            return Err(StoreError::Other(format!(
                "duplicate key {} in `{}`",
                cell(&row, pk_column),
                table_name
            )));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&mut self, table_name: &str, conditions: &[Condition], row: Row) -> Result<u64, StoreError> {
        let snapshot = self.staged.clone();
        let rows = self
            .staged
            .get_mut(table_name)
            .ok_or_else(|| StoreError::UnknownTable(table_name.to_string()))?;
        let mut touched = 0;
        for existing in rows.iter_mut() {
            if row_matches(&snapshot, table_name, existing, conditions, &[])? {
                for (k, v) in &row {
                    existing.insert(k.clone(), v.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete(&mut self, table_name: &str, conditions: &[Condition]) -> Result<u64, StoreError> {
        let snapshot = self.staged.clone();
        let rows = self
            .staged
            .get_mut(table_name)
            .ok_or_else(|| StoreError::UnknownTable(table_name.to_string()))?;
        let before = rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in rows.drain(..) {
            if !row_matches(&snapshot, table_name, &row, conditions, &[])? {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok((before - rows.len()) as u64)
    }

    async fn find_first(&mut self, table_name: &str, conditions: &[Condition]) -> Result<Option<Row>, StoreError> {
        first_match(&self.staged, table_name, conditions)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn table<'a>(tables: &'a Tables, name: &str) -> Result<&'a Vec<Row>, StoreError> {
    tables.get(name).ok_or_else(|| StoreError::UnknownTable(name.to_string()))
}

fn first_match(tables: &Tables, table_name: &str, conditions: &[Condition]) -> Result<Option<Row>, StoreError> {
    for row in table(tables, table_name)? {
        if row_matches(tables, table_name, row, conditions, &[])? {
            return Ok(Some(row.clone()));
        }
    }
    Ok(None)
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

/// Conditions on the base table apply to the row; conditions on a joined table require one
/// related row satisfying all of them.
fn row_matches(
    tables: &Tables,
    base: &str,
    row: &Row,
    conditions: &[Condition],
    joins: &[JoinClause],
) -> Result<bool, StoreError> {
    if !conditions.iter().filter(|c| c.table == base).all(|c| eval(c, row)) {
        return Ok(false);
    }
    for join in joins {
        let parent_key = cell(row, &join.parent_column);
        let joined: Vec<&Condition> = conditions.iter().filter(|c| c.table == join.table).collect();
        let related = table(tables, &join.table)?;
        let hit = related.iter().any(|r| {
            compare_cells(cell(r, &join.column), parent_key) == Ordering::Equal
                && !cell(r, &join.column).is_null()
                && joined.iter().all(|c| eval(c, r))
        });
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval(cond: &Condition, row: &Row) -> bool {
    let value = cell(row, &cond.column);
    if cond.is_null_check() {
        return match cond.op {
            FilterOp::Ne => !value.is_null(),
            _ => value.is_null(),
        };
    }
    if value.is_null() {
        return false;
    }
    let args = cond.storage_args();
    let first = args.first().unwrap_or(&NULL);
    match cond.op {
        FilterOp::Eq => sql_eq(value, first),
        FilterOp::Ne => !sql_eq(value, first),
        FilterOp::Gt => compare_cells(value, first) == Ordering::Greater,
        FilterOp::Lt => compare_cells(value, first) == Ordering::Less,
        FilterOp::Gte => compare_cells(value, first) != Ordering::Less,
        FilterOp::Lte => compare_cells(value, first) != Ordering::Greater,
        FilterOp::In => args.iter().any(|a| sql_eq(value, a)),
        FilterOp::Lookup => match (value.as_str(), first.as_str()) {
            (Some(s), Some(pattern)) => like(s, pattern),
            _ => false,
        },
    }
}

fn sql_eq(a: &Value, b: &Value) -> bool {
    compare_cells(a, b) == Ordering::Equal
}

/// Total order over stored cells: null < bool < number < string < other.
fn compare_cells(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64(), x.as_u64(), y.as_u64()) {
            (Some(i), Some(j), _, _) => i.cmp(&j),
            (_, _, Some(i), Some(j)) => i.cmp(&j),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (x, y) if rank(x) == rank(y) => x.to_string().cmp(&y.to_string()),
        (x, y) => rank(x).cmp(&rank(y)),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum LikeToken {
    Lit(char),
    One,
    Any,
}

/// SQL `LIKE ... ESCAPE '\'`: `%` and `_` wildcards, a backslash makes the next character literal.
fn like(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let mut p = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        p.push(match c {
            '\\' => LikeToken::Lit(chars.next().unwrap_or('\\')),
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            c => LikeToken::Lit(c),
        });
    }
    let (mut si, mut pi) = (0, 0);
    let (mut star, mut mark) = (None, 0);
    while si < s.len() {
        let step = match p.get(pi) {
            Some(LikeToken::One) => true,
            Some(LikeToken::Lit(c)) => *c == s[si],
            _ => false,
        };
        if step {
            si += 1;
            pi += 1;
        } else if p.get(pi) == Some(&LikeToken::Any) {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(sp) = star {
            pi = sp + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while p.get(pi) == Some(&LikeToken::Any) {
        pi += 1;
    }
    pi == p.len()
}
