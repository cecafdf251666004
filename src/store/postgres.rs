//! PostgreSQL store on a sqlx pool.

use crate::error::StoreError;
use crate::filter::Condition;
use crate::migration::column_types;
use crate::schema::FieldsMapping;
use crate::sql::{self, ColumnTypes, PgBindValue, QueryBuf};
use crate::store::{ListQuery, Row, Store, StoreTx};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{ConnectOptions, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    types: Arc<ColumnTypes>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore {
            pool,
            types: Arc::new(ColumnTypes::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Record the column types of a registered record so parameters get the right casts.
    pub fn register(&mut self, mapping: &FieldsMapping) -> &mut Self {
        Arc::make_mut(&mut self.types).insert(mapping.table.clone(), column_types(mapping));
        self
    }

    pub fn register_relation_table(&mut self, table: &str) -> &mut Self {
        let cols = [("id", "BIGINT"), ("user_id", "BIGINT"), ("object_id", "BIGINT"), ("role", "SMALLINT")]
            .into_iter()
            .map(|(c, t)| (c.to_string(), t))
            .collect();
        Arc::make_mut(&mut self.types).insert(table.to_string(), cols);
        self
    }
}

fn build(q: &QueryBuf) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx {
            tx,
            types: self.types.clone(),
        }))
    }

    async fn count(&self, query: &ListQuery) -> Result<u64, StoreError> {
        use sqlx::Row as _;
        let q = sql::count(query, &self.types);
        let row = build(&q).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn select_ids(&self, query: &ListQuery) -> Result<Vec<Value>, StoreError> {
        let q = sql::select_ids(query, &self.types);
        let rows = build(&q).fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|r| row_to_json(r).remove(&query.id_column).unwrap_or(Value::Null))
            .collect())
    }

    async fn find_first(&self, table: &str, conditions: &[Condition]) -> Result<Option<Row>, StoreError> {
        let q = sql::select_where(table, conditions, None, Some(1), &self.types);
        let row = build(&q).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn find_all(
        &self,
        table: &str,
        conditions: &[Condition],
        order_by: Option<&str>,
    ) -> Result<Vec<Row>, StoreError> {
        let q = sql::select_where(table, conditions, order_by, None, &self.types);
        let rows = build(&q).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
    types: Arc<ColumnTypes>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert(&mut self, table: &str, pk_column: &str, mut row: Row) -> Result<Row, StoreError> {
        if matches!(row.get(pk_column), Some(Value::Null)) || row.get(pk_column).and_then(Value::as_u64) == Some(0) {
            row.remove(pk_column);
        }
        let q = sql::insert(table, &row, &self.types);
        let stored = build(&q).fetch_one(&mut *self.tx).await?;
        Ok(row_to_json(&stored))
    }

    async fn update(&mut self, table: &str, conditions: &[Condition], row: Row) -> Result<u64, StoreError> {
        let Some(q) = sql::update(table, conditions, &row, &self.types) else {
            return Ok(0);
        };
        let done = build(&q).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn delete(&mut self, table: &str, conditions: &[Condition]) -> Result<u64, StoreError> {
        let q = sql::delete(table, conditions, &self.types);
        let done = build(&q).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn find_first(&mut self, table: &str, conditions: &[Condition]) -> Result<Option<Row>, StoreError> {
        let q = sql::select_where(table, conditions, None, Some(1), &self.types);
        let row = build(&q).fetch_optional(&mut *self.tx).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::from(n);
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| StoreError::Other(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name.replace('"', "\"\"")))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Other("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}
