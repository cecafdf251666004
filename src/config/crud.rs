//! Per-record-type CRUD configuration: list behavior, lifecycle hooks, permissions and relations.

use crate::codec::FieldValue;
use crate::error::EngineError;
use crate::filter::{HasManyFilter, PredefinedQuery};
use crate::identity::RequestContext;
use crate::schema::Record;
use crate::state::AppState;
use crate::store::StoreTx;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Runs inside the create transaction, before the insert (`on_object_create`) or after it and
/// after the relation row (`on_after_create`). An error rolls the transaction back.
#[async_trait]
pub trait CreateHook<R: Record>: Send + Sync {
    async fn run(&self, tx: &mut dyn StoreTx, ctx: &RequestContext, record: &mut R) -> Result<(), EngineError>;
}

/// Produces the documents for `GET /:id/<suffix>`.
#[async_trait]
pub trait RelatedFetcher<R: Record>: Send + Sync {
    async fn fetch(
        &self,
        parent: &R,
        state: &AppState,
        ctx: &mut RequestContext,
    ) -> Result<Vec<Map<String, Value>>, EngineError>;
}

/// Read/write gate. The record is `None` for list and create-before-fill checks; the context
/// carries the caller's `relation_role` once a relation or permission table row was found.
pub type PermissionCheck<R> = fn(&RequestContext, Option<&R>) -> bool;

/// Id of the object whose membership grants rights on a record (e.g. a card's board).
pub type RelatedIdGetter<R> = fn(&R) -> Option<FieldValue>;

/// Non-admin writes need a `(user_id, object_id = related_id(record))` row in `table`.
pub struct PermissionTable<R> {
    pub table: String,
    pub related_id: RelatedIdGetter<R>,
}

#[derive(Clone, Debug, Default)]
pub struct ListConfig {
    pub per_page: Option<u64>,
    pub disabled: HashSet<String>,
    pub has_many: Vec<HasManyFilter>,
    pub predefined: HashMap<String, PredefinedQuery>,
}

impl ListConfig {
    pub fn has_many_filter(&self, name: &str) -> Option<&HasManyFilter> {
        self.has_many.iter().find(|h| h.name == name)
    }

    pub fn is_disabled(&self, fill_name: &str) -> bool {
        self.disabled.contains(fill_name)
    }
}

pub struct CrudConfig<R: Record> {
    pub list: ListConfig,
    pub on_create: Option<Arc<dyn CreateHook<R>>>,
    pub after_create: Option<Arc<dyn CreateHook<R>>>,
    /// Relation table holding `(user_id, object_id, role)` rows for relation-owned types.
    pub relation_table: Option<String>,
    pub permission_table: Option<PermissionTable<R>>,
    pub related: Vec<(String, Arc<dyn RelatedFetcher<R>>)>,
    pub read_permission: Option<PermissionCheck<R>>,
    pub write_permission: Option<PermissionCheck<R>>,
}

impl<R: Record> Default for CrudConfig<R> {
    fn default() -> Self {
        CrudConfig {
            list: ListConfig::default(),
            on_create: None,
            after_create: None,
            relation_table: None,
            permission_table: None,
            related: Vec::new(),
            read_permission: None,
            write_permission: None,
        }
    }
}

impl<R: Record> CrudConfig<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_page(mut self, n: u64) -> Self {
        self.list.per_page = Some(n);
        self
    }

    /// Drop client filters on this fill name, admins included.
    pub fn disable_filter(mut self, fill_name: &str) -> Self {
        self.list.disabled.insert(fill_name.to_string());
        self
    }

    pub fn has_many_filter(mut self, filter: HasManyFilter) -> Self {
        self.list.has_many.push(filter);
        self
    }

    pub fn predefined(mut self, query: PredefinedQuery) -> Self {
        self.list.predefined.insert(query.name.clone(), query);
        self
    }

    pub fn on_object_create(mut self, hook: impl CreateHook<R> + 'static) -> Self {
        self.on_create = Some(Arc::new(hook));
        self
    }

    pub fn on_after_create(mut self, hook: impl CreateHook<R> + 'static) -> Self {
        self.after_create = Some(Arc::new(hook));
        self
    }

    pub fn store_relation(mut self, table: &str) -> Self {
        self.relation_table = Some(table.to_string());
        self
    }

    /// Resolve write rights through `table` rows keyed by `related_id(record)`.
    pub fn permission_table(mut self, table: &str, related_id: RelatedIdGetter<R>) -> Self {
        self.permission_table = Some(PermissionTable {
            table: table.to_string(),
            related_id,
        });
        self
    }

    pub fn related(mut self, path_suffix: &str, fetcher: impl RelatedFetcher<R> + 'static) -> Self {
        self.related.push((path_suffix.to_string(), Arc::new(fetcher)));
        self
    }

    pub fn read_permission(mut self, check: PermissionCheck<R>) -> Self {
        self.read_permission = Some(check);
        self
    }

    pub fn write_permission(mut self, check: PermissionCheck<R>) -> Self {
        self.write_permission = Some(check);
        self
    }

    pub fn related_fetcher(&self, suffix: &str) -> Option<&Arc<dyn RelatedFetcher<R>>> {
        self.related.iter().find(|(s, _)| s == suffix).map(|(_, f)| f)
    }
}
