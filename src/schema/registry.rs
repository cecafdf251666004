//! Record trait, optional per-type capabilities, and the process-wide schema registry.

use crate::codec::FieldValue;
use crate::error::{CodecError, EngineError};
use crate::identity::RequestIdentity;
use crate::schema::{FieldsMapping, SchemaBuilder};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A plain data-record type served by the engine. The schema is declared as data; field access
/// goes through declared names so no runtime type inspection is needed.
pub trait Record: Default + Clone + Send + Sync + 'static {
    fn declare(schema: &mut SchemaBuilder);

    fn get(&self, field: &str) -> Option<FieldValue>;

    fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError>;

    fn capabilities() -> Capabilities<Self> {
        Capabilities::none()
    }

    /// Short type name used in logs and error messages.
    fn type_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Extra mutation after scalar fields were filled. An error aborts the whole fill.
pub type CustomFill<R> = fn(&mut R, &Map<String, Value>, &RequestIdentity) -> Result<(), EngineError>;

/// Receives the scalar-derived document and returns the final one.
pub type CustomExport<R> =
    fn(&R, Map<String, Value>, &RequestIdentity) -> Result<Map<String, Value>, EngineError>;

/// Called inside the update transaction with (previous, updated); an error vetoes the save.
pub type UpdateHook<R> = fn(&R, &R, &RequestIdentity) -> Result<(), EngineError>;

/// Optional behaviors a record type supplies. Collected once at registration and cached.
pub struct Capabilities<R> {
    pub fill: Option<CustomFill<R>>,
    pub export: Option<CustomExport<R>>,
    pub on_update: Option<UpdateHook<R>>,
}

impl<R> Capabilities<R> {
    pub fn none() -> Self {
        Capabilities {
            fill: None,
            export: None,
            on_update: None,
        }
    }

    pub fn with_fill(mut self, f: CustomFill<R>) -> Self {
        self.fill = Some(f);
        self
    }

    pub fn with_export(mut self, f: CustomExport<R>) -> Self {
        self.export = Some(f);
        self
    }

    pub fn with_update_hook(mut self, f: UpdateHook<R>) -> Self {
        self.on_update = Some(f);
        self
    }
}

impl<R> Clone for Capabilities<R> {
    fn clone(&self) -> Self {
        Capabilities {
            fill: self.fill,
            export: self.export,
            on_update: self.on_update,
        }
    }
}

/// Mapping plus capability table for one record type.
pub struct RecordSchema<R> {
    pub mapping: Arc<FieldsMapping>,
    pub capabilities: Capabilities<R>,
}

/// Registration results keyed by type identity. Populated during bootstrap, read concurrently
/// afterwards.
#[derive(Default)]
pub struct SchemaRegistry {
    by_type: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    by_table: RwLock<HashMap<String, Arc<FieldsMapping>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare and cache `R`'s mapping. Re-registering overwrites the cached entry.
    pub fn register<R: Record>(&self) -> Result<Arc<FieldsMapping>, EngineError> {
        let mut builder = SchemaBuilder::new();
        R::declare(&mut builder);
        let capabilities = R::capabilities();
        let mut mapping = FieldsMapping::build(R::type_name(), builder)?;
        mapping.has_custom_fill = capabilities.fill.is_some();
        mapping.has_custom_export = capabilities.export.is_some();
        mapping.has_update_hook = capabilities.on_update.is_some();
        let mapping = Arc::new(mapping);

        tracing::info!(
            record = %mapping.type_name,
            table = %mapping.table,
            fillable = mapping.fillable.len(),
            outable = mapping.outable.len(),
            "registered record type"
        );

        let schema: Arc<RecordSchema<R>> = Arc::new(RecordSchema {
            mapping: mapping.clone(),
            capabilities,
        });
        self.by_type
            .write()
            .map_err(|_| lock_error())?
            .insert(TypeId::of::<R>(), schema);
        self.by_table
            .write()
            .map_err(|_| lock_error())?
            .insert(mapping.table.clone(), mapping.clone());
        Ok(mapping)
    }

    pub fn lookup<R: Record>(&self) -> Result<Arc<RecordSchema<R>>, EngineError> {
        let entry = self
            .by_type
            .read()
            .map_err(|_| lock_error())?
            .get(&TypeId::of::<R>())
            .cloned()
            .ok_or_else(|| EngineError::NotRegistered(R::type_name().to_string()))?;
        entry
            .downcast::<RecordSchema<R>>()
            .map_err(|_| EngineError::NotRegistered(R::type_name().to_string()))
    }

    pub fn mapping<R: Record>(&self) -> Result<Arc<FieldsMapping>, EngineError> {
        Ok(self.lookup::<R>()?.mapping.clone())
    }

    pub fn mapping_for_table(&self, table: &str) -> Option<Arc<FieldsMapping>> {
        self.by_table.read().ok()?.get(table).cloned()
    }

    pub fn tables(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .by_table
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

fn lock_error() -> EngineError {
    EngineError::PanicRecovered {
        cause: "schema registry lock poisoned".into(),
        stack: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    #[derive(Default, Clone)]
    struct Tag {
        id: u64,
        name: String,
    }

    impl Record for Tag {
        fn declare(s: &mut SchemaBuilder) {
            s.table("tags");
            s.field("Id", FieldKind::U64).primary_key();
            s.field("Name", FieldKind::String).filterable();
        }

        fn get(&self, field: &str) -> Option<FieldValue> {
            match field {
                "Id" => Some(FieldValue::U64(self.id)),
                "Name" => Some(FieldValue::String(self.name.clone())),
                _ => None,
            }
        }

        fn set(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
            match field {
                "Id" => self.id = value.as_u64(field)?,
                "Name" => self.name = value.into_string(field)?,
                _ => return Err(CodecError::UnknownField(field.to_string())),
            }
            Ok(())
        }

        fn capabilities() -> Capabilities<Self> {
            Capabilities::none().with_update_hook(|_, _, _| Ok(()))
        }
    }

    #[derive(Default, Clone)]
    struct Unregistered;

    impl Record for Unregistered {
        fn declare(s: &mut SchemaBuilder) {
            s.table("nothing");
            s.field("Id", FieldKind::U64);
        }
        fn get(&self, _: &str) -> Option<FieldValue> {
            None
        }
        fn set(&mut self, field: &str, _: FieldValue) -> Result<(), CodecError> {
            Err(CodecError::UnknownField(field.to_string()))
        }
    }

    #[test]
    fn register_then_lookup() {
        let registry = SchemaRegistry::new();
        let mapping = registry.register::<Tag>().unwrap();
        assert_eq!(mapping.type_name, "Tag");
        assert!(mapping.has_update_hook);
        assert!(!mapping.has_custom_fill);

        let schema = registry.lookup::<Tag>().unwrap();
        assert!(schema.capabilities.on_update.is_some());
        assert_eq!(registry.tables(), vec!["tags".to_string()]);
        assert!(registry.mapping_for_table("tags").is_some());
    }

    #[test]
    fn register_is_idempotent() {
        let registry = SchemaRegistry::new();
        registry.register::<Tag>().unwrap();
        registry.register::<Tag>().unwrap();
        assert_eq!(registry.tables().len(), 1);
    }

    #[test]
    fn lookup_of_unregistered_type_fails() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.lookup::<Unregistered>(),
            Err(EngineError::NotRegistered(ref name)) if name == "Unregistered"
        ));
    }
}
