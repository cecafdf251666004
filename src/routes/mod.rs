//! Routers: health/readiness and per-record-type CRUD.

mod common;
mod entity;
pub use common::{common_routes, common_routes_with_ready};
pub use entity::{crud_routes, MAX_BODY_BYTES};
