//! Related-items fetcher: children of another record type keyed by a foreign-key column.

use crate::codec::FieldValue;
use crate::config::RelatedFetcher;
use crate::convert::{export_to_external, record_from_row};
use crate::error::EngineError;
use crate::filter::Condition;
use crate::identity::RequestContext;
use crate::schema::Record;
use crate::state::AppState;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::marker::PhantomData;

/// Extracts the id the children are keyed by from the parent. `None` means no children.
pub type IdGetter<P> = fn(&P) -> Option<FieldValue>;

/// Lists `C` records whose `foreign_key` column equals `id_getter(parent)`, ordered by primary key.
/// Soft-deleted children are hidden from non-admins.
pub struct RelatedModels<P, C> {
    foreign_key: String,
    id_getter: IdGetter<P>,
    _child: PhantomData<fn() -> C>,
}

impl<P, C> RelatedModels<P, C> {
    pub fn new(foreign_key: &str, id_getter: IdGetter<P>) -> Self {
        RelatedModels {
            foreign_key: foreign_key.to_string(),
            id_getter,
            _child: PhantomData,
        }
    }
}

#[async_trait]
impl<P: Record, C: Record> RelatedFetcher<P> for RelatedModels<P, C> {
    async fn fetch(
        &self,
        parent: &P,
        state: &AppState,
        ctx: &mut RequestContext,
    ) -> Result<Vec<Map<String, Value>>, EngineError> {
        let schema = state.schemas.lookup::<C>()?;
        let mapping = &schema.mapping;
        let Some(id) = (self.id_getter)(parent) else {
            ctx.log.note(format!("related {}: parent has no id, nothing to fetch", mapping.type_name));
            return Ok(Vec::new());
        };

        let cast = mapping
            .valid_fields()
            .find(|f| f.column == self.foreign_key)
            .and_then(|f| f.kind.bind_cast());
        let mut conditions = vec![Condition::eq(&mapping.table, &self.foreign_key, id).with_cast(cast)];
        if let Some(sd) = mapping.soft_delete_field() {
            if !ctx.is_admin() {
                conditions.push(Condition::eq(&mapping.table, &sd.column, false));
            }
        }
        ctx.log.note(format!(
            "related {}: `{}`",
            mapping.type_name,
            conditions.iter().map(|c| c.render(false)).collect::<Vec<_>>().join(" AND ")
        ));

        let rows = state
            .store
            .find_all(&mapping.table, &conditions, Some(mapping.primary().column.as_str()))
            .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let child: C = record_from_row(mapping, row)?;
            items.push(export_to_external(&schema, &child, &state.codecs, ctx)?);
        }
        Ok(items)
    }
}
