//! CrudEngine: one record type's list/get/create/update/delete/related state machine.
//!
//! Every verb runs `authorize -> filter or fill -> persist -> hook -> respond`; multi-step writes
//! share one store transaction and any failure rolls it back.

use crate::codec::{export_field_value, process_field_type, stored_field_value, FieldValue};
use crate::config::{validate_crud_config, CrudConfig};
use crate::convert::{export_to_external, fill_from_external, record_from_row, record_to_row, stored_fields};
use crate::error::EngineError;
use crate::filter::{
    owner_value, resolve_predefined, scope_conditions, CompiledFilter, Condition, FilterCompiler, FilterOp,
    JoinClause, ListParams,
};
use crate::identity::{RequestContext, RequestIdentity};
use crate::recover::recovered;
use crate::response::{DeleteResponse, ItemResponse, ListResponse};
use crate::schema::{FieldsMapping, Record, RecordSchema};
use crate::service::RequestValidator;
use crate::state::AppState;
use crate::store::{ListQuery, Row, StoreTx};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Relation table columns for relation-owned types.
const REL_USER: &str = "user_id";
const REL_OBJECT: &str = "object_id";
const REL_ROLE: &str = "role";

pub struct CrudEngine<R: Record> {
    state: AppState,
    config: Arc<CrudConfig<R>>,
}

impl<R: Record> Clone for CrudEngine<R> {
    fn clone(&self) -> Self {
        CrudEngine {
            state: self.state.clone(),
            config: self.config.clone(),
        }
    }
}

struct Loaded<R> {
    record: R,
    id: FieldValue,
}

impl<R: Record> CrudEngine<R> {
    /// `R` must already be registered in `state.schemas`; the config is checked against its mapping.
    pub fn new(state: AppState, config: CrudConfig<R>) -> Result<Self, EngineError> {
        let mapping = state.schemas.mapping::<R>()?;
        validate_crud_config(&config, &mapping)?;
        Ok(CrudEngine {
            state,
            config: Arc::new(config),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &CrudConfig<R> {
        &self.config
    }

    /// Fresh per-request context for `identity`.
    pub fn context(&self, identity: RequestIdentity) -> RequestContext {
        RequestContext::new(identity, self.state.config.debug_enabled)
    }

    pub async fn list(&self, params: &ListParams, ctx: &mut RequestContext) -> Result<ListResponse, EngineError> {
        let schema = self.state.schemas.lookup::<R>()?;
        let mapping = &schema.mapping;
        self.check_read(ctx, None)?;

        let (doc, params) = match params.query.as_deref().filter(|q| !q.is_empty()) {
            Some(name) => {
                ctx.log.note(format!("predefined query `{}` replaces the filter", name));
                resolve_predefined(&self.config.list, params)?
            }
            None => (params.filter_document()?, params.clone()),
        };

        let compiler = FilterCompiler {
            mapping,
            list: &self.config.list,
            engine: &self.state.config,
            codecs: &self.state.codecs,
        };
        let compiled = match compiler.compile(doc, &params, ctx) {
            Ok(mut c) => self.scope_to_relation(mapping, &mut c, ctx).map(|_| c),
            Err(e) => Err(e),
        };
        let compiled = match compiled {
            Ok(c) => c,
            Err(EngineError::NoAccess) => return Ok(ListResponse::no_access(ctx.visible_logs())),
            Err(e) => return Err(e),
        };

        let query = ListQuery::from(&compiled);
        let total = self.state.store.count(&query).await?;
        let ids = self.state.store.select_ids(&query).await?;
        ctx.log.note(format!("list: {} matching, {} on page {}", total, ids.len(), compiled.page));
        let items = self.hydrate(&schema, ids, ctx).await?;

        Ok(ListResponse {
            items,
            pages: compiled.pages(total),
            total_items: total,
            msg: None,
            logs: ctx.visible_logs(),
        })
    }

    pub async fn get_one(&self, raw_id: &str, ctx: &mut RequestContext) -> Result<ItemResponse, EngineError> {
        let schema = self.state.schemas.lookup::<R>()?;
        let loaded = self.load(&schema, raw_id, ctx).await?;
        self.check_read(ctx, Some(&loaded.record))?;
        let item = export_to_external(&schema, &loaded.record, &self.state.codecs, ctx)?;
        Ok(ItemResponse {
            item,
            logs: ctx.visible_logs(),
            created: false,
        })
    }

    pub async fn create(&self, body: Value, ctx: &mut RequestContext) -> Result<ItemResponse, EngineError> {
        let schema = self.state.schemas.lookup::<R>()?;
        let mapping = schema.mapping.clone();
        let doc = into_document(body)?;
        self.check_write(ctx, None)?;
        RequestValidator::validate(&mapping, &doc)?;

        let mut record = R::default();
        let assigned = fill_from_external(&schema, &mut record, &doc, &self.state.codecs, ctx)?;
        ctx.log.note(format!("create: filled {:?}", assigned));

        if let Some(owner) = mapping.owner_field() {
            if !ctx.is_admin() {
                let uid = ctx.identity.authorized_user_id.ok_or(EngineError::NoAccess)?;
                record.set(&owner.name, owner_value(owner, uid)?)?;
                ctx.log.note(format!("create: `{}` forced to caller {}", owner.fill_name, uid));
            }
        }
        let relation_user = match &self.config.relation_table {
            Some(_) => Some(ctx.identity.authorized_user_id.ok_or(EngineError::NoAccess)?),
            None => None,
        };
        self.check_rights(&record, ctx).await?;
        self.check_write(ctx, Some(&record))?;

        let mut tx = self.state.store.begin().await?;
        let outcome = self
            .create_steps(tx.as_mut(), &schema, &mut record, relation_user, ctx)
            .await;
        match outcome {
            Ok(()) => tx.commit().await?,
            Err(e) => return Err(abort(tx, e).await),
        }
        tracing::info!(record = %mapping.type_name, table = %mapping.table, "object created");

        let item = export_to_external(&schema, &record, &self.state.codecs, ctx)?;
        Ok(ItemResponse {
            item,
            logs: ctx.visible_logs(),
            created: true,
        })
    }

    async fn create_steps(
        &self,
        tx: &mut dyn StoreTx,
        schema: &RecordSchema<R>,
        record: &mut R,
        relation_user: Option<u64>,
        ctx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        let mapping = &schema.mapping;
        if let Some(hook) = &self.config.on_create {
            run_hook("on_object_create hook", hook.run(&mut *tx, ctx, record)).await?;
        }

        let row = record_to_row(mapping, &*record, stored_fields(mapping));
        let stored = tx.insert(&mapping.table, &mapping.primary().column, row).await?;
        *record = record_from_row(mapping, &stored)?;

        if let (Some(rel), Some(uid)) = (&self.config.relation_table, relation_user) {
            let object_id = record
                .get(&mapping.primary_key)
                .map(|v| v.to_storage())
                .unwrap_or(Value::Null);
            let mut rel_row = Row::new();
            rel_row.insert(REL_USER.into(), Value::from(uid));
            rel_row.insert(REL_OBJECT.into(), object_id.clone());
            rel_row.insert(REL_ROLE.into(), Value::from(0));
            tx.insert(rel, "id", rel_row).await?;
            ctx.log.note(format!("relation row ({}, {}) stored in `{}`", uid, object_id, rel));
        }

        if let Some(hook) = &self.config.after_create {
            run_hook("on_after_create hook", hook.run(&mut *tx, ctx, record)).await?;
        }
        Ok(())
    }

    pub async fn update(&self, raw_id: &str, body: Value, ctx: &mut RequestContext) -> Result<ItemResponse, EngineError> {
        let schema = self.state.schemas.lookup::<R>()?;
        let mapping = schema.mapping.clone();
        let doc = into_document(body)?;
        RequestValidator::validate_partial(&mapping, &doc)?;

        let Loaded { record: previous, id } = self.load(&schema, raw_id, ctx).await?;
        self.check_rights(&previous, ctx).await?;
        self.check_write(ctx, Some(&previous))?;

        let mut updated = previous.clone();
        fill_from_external(&schema, &mut updated, &doc, &self.state.codecs, ctx)?;
        if let Some(owner) = mapping.owner_field() {
            if !ctx.is_admin() {
                if let Some(v) = previous.get(&owner.name) {
                    updated.set(&owner.name, v)?;
                }
            }
        }
        if let Some(perm) = &self.config.permission_table {
            if (perm.related_id)(&updated) != (perm.related_id)(&previous) {
                ctx.log.note("update moves the record to another related object, rights rechecked");
                self.check_rights(&updated, ctx).await?;
            }
        }
        let changed: Vec<&str> = mapping
            .valid_fields()
            .filter(|f| !f.primary_key && previous.get(&f.name) != updated.get(&f.name))
            .map(|f| f.name.as_str())
            .collect();
        ctx.log.note(format!("update: changed fields {:?}", changed));

        let mut tx = self.state.store.begin().await?;
        let outcome = self
            .update_steps(tx.as_mut(), &schema, &id, &previous, &updated, &changed, ctx)
            .await;
        match outcome {
            Ok(()) => tx.commit().await?,
            Err(e) => return Err(abort(tx, e).await),
        }

        let item = export_to_external(&schema, &updated, &self.state.codecs, ctx)?;
        Ok(ItemResponse {
            item,
            logs: ctx.visible_logs(),
            created: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_steps(
        &self,
        tx: &mut dyn StoreTx,
        schema: &RecordSchema<R>,
        id: &FieldValue,
        previous: &R,
        updated: &R,
        changed: &[&str],
        ctx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        let mapping = &schema.mapping;
        if !changed.is_empty() {
            let row = record_to_row(mapping, updated, changed.iter().copied());
            let touched = tx.update(&mapping.table, &[pk_condition(mapping, id)], row).await?;
            if touched == 0 {
                return Err(EngineError::NotFound(id_text(mapping, id)));
            }
        }

        if let Some(hook) = schema.capabilities.on_update {
            let identity = &ctx.identity;
            match catch_unwind(AssertUnwindSafe(|| hook(previous, updated, identity))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    ctx.log.note(format!("update hook rejected the change: {}", e));
                    return Err(hook_error(e));
                }
                Err(payload) => return Err(recovered(format_args!("update hook of {}", mapping.type_name), payload)),
            }
        }
        Ok(())
    }

    pub async fn delete(&self, raw_id: &str, ctx: &mut RequestContext) -> Result<DeleteResponse, EngineError> {
        let schema = self.state.schemas.lookup::<R>()?;
        let mapping = schema.mapping.clone();
        let loaded = self.load(&schema, raw_id, ctx).await?;
        self.check_rights(&loaded.record, ctx).await?;
        self.check_write(ctx, Some(&loaded.record))?;

        let mut tx = self.state.store.begin().await?;
        let outcome = self.delete_steps(tx.as_mut(), &mapping, &loaded.id, ctx).await;
        match outcome {
            Ok(()) => tx.commit().await?,
            Err(e) => return Err(abort(tx, e).await),
        }
        let soft = mapping.soft_delete.is_some();
        tracing::info!(record = %mapping.type_name, id = %id_text(&mapping, &loaded.id), soft, "object deleted");

        Ok(DeleteResponse {
            id: loaded.id.to_storage(),
            soft,
            logs: ctx.visible_logs(),
        })
    }

    async fn delete_steps(
        &self,
        tx: &mut dyn StoreTx,
        mapping: &FieldsMapping,
        id: &FieldValue,
        ctx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        let table = &mapping.table;
        let touched = match mapping.soft_delete_field() {
            Some(sd) => {
                ctx.log.note(format!("delete: only `{}` is set", sd.column));
                let mut row = Row::new();
                row.insert(sd.column.clone(), Value::Bool(true));
                tx.update(table, &[pk_condition(mapping, id)], row).await?
            }
            None => {
                let n = tx.delete(table, &[pk_condition(mapping, id)]).await?;
                if let Some(rel) = &self.config.relation_table {
                    let gone = tx.delete(rel, &[Condition::eq(rel, REL_OBJECT, id.clone())]).await?;
                    ctx.log.note(format!("delete: {} relation rows removed", gone));
                }
                n
            }
        };
        if touched == 0 {
            return Err(EngineError::NotFound(id_text(mapping, id)));
        }
        Ok(())
    }

    /// `GET /:id/<suffix>`: documents produced by the configured fetcher for the parent.
    pub async fn related(
        &self,
        raw_id: &str,
        suffix: &str,
        ctx: &mut RequestContext,
    ) -> Result<ListResponse, EngineError> {
        let fetcher = self
            .config
            .related_fetcher(suffix)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("relation `{}`", suffix)))?;
        let schema = self.state.schemas.lookup::<R>()?;
        let loaded = self.load(&schema, raw_id, ctx).await?;
        self.check_read(ctx, Some(&loaded.record))?;

        let items = fetcher.fetch(&loaded.record, &self.state, ctx).await?;
        let total = items.len() as u64;
        Ok(ListResponse {
            items,
            pages: u64::from(total > 0),
            total_items: total,
            msg: None,
            logs: ctx.visible_logs(),
        })
    }

    /// Fetch one record by id under the same scoping as list; a caller without an identity to
    /// scope by sees `NotFound`.
    async fn load(
        &self,
        schema: &RecordSchema<R>,
        raw_id: &str,
        ctx: &mut RequestContext,
    ) -> Result<Loaded<R>, EngineError> {
        let mapping = &schema.mapping;
        let id = process_field_type(
            mapping.primary(),
            &Value::String(raw_id.to_string()),
            &self.state.codecs,
            &mut ctx.log,
        )
        .map_err(|_| EngineError::Validation("invalid id".into()))?;

        let conditions = match scope_conditions(mapping, &id, ctx) {
            Ok(c) => c,
            Err(EngineError::NoAccess) => return Err(EngineError::NotFound(raw_id.to_string())),
            Err(e) => return Err(e),
        };
        let row = self
            .state
            .store
            .find_first(&mapping.table, &conditions)
            .await?
            .ok_or_else(|| EngineError::NotFound(raw_id.to_string()))?;
        let record = record_from_row(mapping, &row)?;
        self.check_relation(&id, ctx).await?;
        Ok(Loaded { record, id })
    }

    /// Relation-owned types: non-admins need a relation row for the object.
    async fn check_relation(&self, id: &FieldValue, ctx: &mut RequestContext) -> Result<(), EngineError> {
        let Some(rel) = &self.config.relation_table else { return Ok(()) };
        if ctx.is_admin() {
            return Ok(());
        }
        let uid = ctx.identity.authorized_user_id.ok_or(EngineError::NoAccess)?;
        match self.relation_role(rel, uid, id).await? {
            Some(role) => {
                ctx.relation_role = Some(role);
                Ok(())
            }
            None => {
                ctx.log.note(format!("no relation row in `{}` for user {}", rel, uid));
                Err(EngineError::Forbidden("no access to object".into()))
            }
        }
    }

    /// Permission-table types: non-admin writes need a row for the record's related object.
    async fn check_rights(&self, record: &R, ctx: &mut RequestContext) -> Result<(), EngineError> {
        let Some(perm) = &self.config.permission_table else { return Ok(()) };
        if ctx.is_admin() {
            return Ok(());
        }
        let uid = ctx.identity.authorized_user_id.ok_or(EngineError::NoAccess)?;
        let Some(related) = (perm.related_id)(record) else {
            ctx.log.note("rights: record has no related object");
            return Err(EngineError::Forbidden("no right to perform action".into()));
        };
        match self.relation_role(&perm.table, uid, &related).await? {
            Some(role) => {
                ctx.log.note(format!("rights: user {} has role {} via `{}`", uid, role, perm.table));
                ctx.relation_role = Some(role);
                Ok(())
            }
            None => {
                ctx.log.note(format!("rights: no row in `{}` for user {} and {:?}", perm.table, uid, related));
                Err(EngineError::Forbidden("no right to perform action".into()))
            }
        }
    }

    /// Role stored for `(user, object)` in a relation table; `None` when the user has no row.
    async fn relation_role(&self, table: &str, uid: u64, object_id: &FieldValue) -> Result<Option<u8>, EngineError> {
        let conditions = [
            Condition::eq(table, REL_USER, uid),
            Condition::eq(table, REL_OBJECT, object_id.clone()),
        ];
        let row = self.state.store.find_first(table, &conditions).await?;
        Ok(row.map(|r| {
            r.get(REL_ROLE)
                .and_then(Value::as_u64)
                .map_or(0, |role| u8::try_from(role).unwrap_or(u8::MAX))
        }))
    }

    /// Relation-owned types: non-admin lists only cover objects related to the caller.
    fn scope_to_relation(
        &self,
        mapping: &FieldsMapping,
        compiled: &mut CompiledFilter,
        ctx: &mut RequestContext,
    ) -> Result<(), EngineError> {
        let Some(rel) = &self.config.relation_table else { return Ok(()) };
        if ctx.is_admin() {
            return Ok(());
        }
        let uid = ctx.identity.authorized_user_id.ok_or(EngineError::NoAccess)?;
        if !compiled.joins.iter().any(|j| &j.table == rel) {
            compiled.joins.push(JoinClause {
                table: rel.clone(),
                column: REL_OBJECT.into(),
                parent_table: mapping.table.clone(),
                parent_column: mapping.primary().column.clone(),
            });
        }
        compiled.conditions.push(Condition::eq(rel, REL_USER, uid));
        ctx.log.note(format!("list restricted to objects related to user {} via `{}`", uid, rel));
        Ok(())
    }

    /// Load full rows for a page of ids, keeping the page order.
    async fn hydrate(
        &self,
        schema: &RecordSchema<R>,
        ids: Vec<Value>,
        ctx: &mut RequestContext,
    ) -> Result<Vec<Map<String, Value>>, EngineError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mapping = &schema.mapping;
        let pk = mapping.primary();
        let args = ids
            .iter()
            .map(|v| stored_field_value(pk, v))
            .collect::<Result<Vec<_>, _>>()?;
        let by_ids = Condition::new(&mapping.table, &pk.column, FilterOp::In, args).with_cast(pk.kind.bind_cast());
        let rows = self.state.store.find_all(&mapping.table, &[by_ids], None).await?;

        let mut by_key: HashMap<String, Row> = rows
            .into_iter()
            .map(|row| (row.get(&pk.column).map(Value::to_string).unwrap_or_default(), row))
            .collect();
        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(row) = by_key.remove(&id.to_string()) else {
                ctx.log.note(format!("list: id {} vanished before hydration", id));
                continue;
            };
            let record: R = record_from_row(mapping, &row)?;
            items.push(export_to_external(schema, &record, &self.state.codecs, ctx)?);
        }
        Ok(items)
    }

    fn check_read(&self, ctx: &mut RequestContext, record: Option<&R>) -> Result<(), EngineError> {
        if let Some(check) = self.config.read_permission {
            if !check(ctx, record) {
                ctx.log.note("read permission denied");
                return Err(EngineError::Forbidden("no read permission".into()));
            }
        }
        Ok(())
    }

    fn check_write(&self, ctx: &mut RequestContext, record: Option<&R>) -> Result<(), EngineError> {
        if let Some(check) = self.config.write_permission {
            if !check(ctx, record) {
                ctx.log.note("write permission denied");
                return Err(EngineError::Forbidden("no write permission".into()));
            }
        }
        Ok(())
    }
}

fn into_document(body: Value) -> Result<Map<String, Value>, EngineError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(EngineError::Validation("body must be a JSON object".into())),
    }
}

fn pk_condition(mapping: &FieldsMapping, id: &FieldValue) -> Condition {
    let pk = mapping.primary();
    Condition::eq(&mapping.table, &pk.column, id.clone()).with_cast(pk.kind.bind_cast())
}

fn id_text(mapping: &FieldsMapping, id: &FieldValue) -> String {
    match export_field_value(mapping.primary(), id, &Default::default()) {
        Ok(Value::String(s)) => s,
        Ok(v) => v.to_string(),
        Err(_) => format!("{:?}", id),
    }
}

/// Hook failures surface as `Hook` unless they already carry a recovered panic.
fn hook_error(e: EngineError) -> EngineError {
    match e {
        EngineError::Hook(_) | EngineError::PanicRecovered { .. } => e,
        other => EngineError::Hook(other.to_string()),
    }
}

/// Await a create hook; a panic inside it becomes `PanicRecovered` instead of unwinding the request.
async fn run_hook(what: &str, hook: impl Future<Output = Result<(), EngineError>>) -> Result<(), EngineError> {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(res) => res.map_err(hook_error),
        Err(payload) => Err(recovered(what, payload)),
    }
}

async fn abort(tx: Box<dyn StoreTx>, err: EngineError) -> EngineError {
    tracing::warn!(error = %err, "rolling back");
    if let Err(e) = tx.rollback().await {
        tracing::error!(error = %e, "rollback failed");
    }
    err
}
