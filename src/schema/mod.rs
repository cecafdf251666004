//! Schema introspection: per-type field maps declared as data and cached by type identity.

mod builder;
mod descriptor;
mod mapping;
mod registry;

pub use builder::{FieldBuilder, SchemaBuilder};
pub use descriptor::{FieldDescriptor, FieldKind};
pub use mapping::FieldsMapping;
pub use registry::{Capabilities, CustomExport, CustomFill, Record, RecordSchema, SchemaRegistry, UpdateHook};
