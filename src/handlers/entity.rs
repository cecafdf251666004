//! Record CRUD handlers, generic over the record type served by a `CrudEngine` state.

use crate::error::ApiFailure;
use crate::extractors::Identity;
use crate::filter::ListParams;
use crate::response::{DeleteResponse, ItemResponse, ListResponse};
use crate::schema::Record;
use crate::service::CrudEngine;
use crate::state::AppState;
use axum::{
    extract::{FromRef, Path, Query, State},
    Json,
};
use serde_json::Value;

impl<R: Record> FromRef<CrudEngine<R>> for AppState {
    fn from_ref(engine: &CrudEngine<R>) -> AppState {
        engine.state().clone()
    }
}

pub async fn list<R: Record>(
    State(engine): State<CrudEngine<R>>,
    Identity(identity): Identity,
    Query(params): Query<ListParams>,
) -> Result<ListResponse, ApiFailure> {
    let mut ctx = engine.context(identity);
    let res = engine.list(&params, &mut ctx).await;
    res.map_err(|e| ApiFailure::new(e, &ctx))
}

pub async fn create<R: Record>(
    State(engine): State<CrudEngine<R>>,
    Identity(identity): Identity,
    Json(body): Json<Value>,
) -> Result<ItemResponse, ApiFailure> {
    let mut ctx = engine.context(identity);
    let res = engine.create(body, &mut ctx).await;
    res.map_err(|e| ApiFailure::new(e, &ctx))
}

pub async fn read<R: Record>(
    State(engine): State<CrudEngine<R>>,
    Identity(identity): Identity,
    Path(id): Path<String>,
) -> Result<ItemResponse, ApiFailure> {
    let mut ctx = engine.context(identity);
    let res = engine.get_one(&id, &mut ctx).await;
    res.map_err(|e| ApiFailure::new(e, &ctx))
}

pub async fn update<R: Record>(
    State(engine): State<CrudEngine<R>>,
    Identity(identity): Identity,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<ItemResponse, ApiFailure> {
    let mut ctx = engine.context(identity);
    let res = engine.update(&id, body, &mut ctx).await;
    res.map_err(|e| ApiFailure::new(e, &ctx))
}

pub async fn delete<R: Record>(
    State(engine): State<CrudEngine<R>>,
    Identity(identity): Identity,
    Path(id): Path<String>,
) -> Result<DeleteResponse, ApiFailure> {
    let mut ctx = engine.context(identity);
    let res = engine.delete(&id, &mut ctx).await;
    res.map_err(|e| ApiFailure::new(e, &ctx))
}

pub async fn related<R: Record>(
    State(engine): State<CrudEngine<R>>,
    Identity(identity): Identity,
    Path((id, relation)): Path<(String, String)>,
) -> Result<ListResponse, ApiFailure> {
    let mut ctx = engine.context(identity);
    let res = engine.related(&id, &relation, &mut ctx).await;
    res.map_err(|e| ApiFailure::new(e, &ctx))
}
