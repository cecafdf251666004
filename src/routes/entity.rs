//! Record CRUD routes for one record type. Nest the router under the type's path.

use crate::handlers::entity::{create, delete as delete_handler, list, read, related, update};
use crate::schema::Record;
use crate::service::CrudEngine;
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies above this size are rejected with 413 before reaching a handler.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// `GET /`, `POST /`, `GET|PATCH|DELETE /:id` and `GET /:id/:relation`.
pub fn crud_routes<R: Record>(engine: CrudEngine<R>) -> Router {
    Router::new()
        .route("/", get(list::<R>).post(create::<R>))
        .route(
            "/:id",
            get(read::<R>).patch(update::<R>).delete(delete_handler::<R>),
        )
        .route("/:id/:relation", get(related::<R>))
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)))
        .with_state(engine)
}
