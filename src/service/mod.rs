//! CrudEngine: the generic per-verb request state machine, plus request validation and related
//! lookups.

mod crud;
mod related;
mod validation;
pub use crud::CrudEngine;
pub use related::{IdGetter, RelatedModels};
pub use validation::{FieldRule, RequestValidator};
