//! Storage collaborator: the narrow query/transaction interface the engine persists through.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::error::StoreError;
use crate::filter::{CompiledFilter, Condition, JoinClause, SortSpec};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Column name -> stored value.
pub type Row = Map<String, Value>;

/// Count / id-page request derived from a compiled filter.
#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    pub table: String,
    pub id_column: String,
    pub conditions: Vec<Condition>,
    pub joins: Vec<JoinClause>,
    pub sort: Option<SortSpec>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl ListQuery {
    pub fn qualified(&self) -> bool {
        !self.joins.is_empty()
    }
}

impl From<&CompiledFilter> for ListQuery {
    fn from(f: &CompiledFilter) -> Self {
        ListQuery {
            table: f.table.clone(),
            id_column: f.id_column.clone(),
            conditions: f.conditions.clone(),
            joins: f.joins.clone(),
            sort: f.sort.clone(),
            limit: Some(f.limit),
            offset: f.offset,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Number of distinct ids matching the query (paging ignored).
    async fn count(&self, query: &ListQuery) -> Result<u64, StoreError>;

    /// One page of distinct ids, sorted as requested.
    async fn select_ids(&self, query: &ListQuery) -> Result<Vec<Value>, StoreError>;

    async fn find_first(&self, table: &str, conditions: &[Condition]) -> Result<Option<Row>, StoreError>;

    async fn find_all(
        &self,
        table: &str,
        conditions: &[Condition],
        order_by: Option<&str>,
    ) -> Result<Vec<Row>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// An open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Insert and return the stored row. A row without `pk_column` gets a generated id.
    async fn insert(&mut self, table: &str, pk_column: &str, row: Row) -> Result<Row, StoreError>;

    /// Set the row's columns on every match; returns the number of rows touched.
    async fn update(&mut self, table: &str, conditions: &[Condition], row: Row) -> Result<u64, StoreError>;

    async fn delete(&mut self, table: &str, conditions: &[Condition]) -> Result<u64, StoreError>;

    async fn find_first(&mut self, table: &str, conditions: &[Condition]) -> Result<Option<Row>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
