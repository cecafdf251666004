//! HTTP handlers for record CRUD.

pub mod entity;
pub use entity::*;
