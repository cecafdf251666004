//! Declarative schema table filled by `Record::declare`.

use crate::schema::{FieldDescriptor, FieldKind};
use crate::service::FieldRule;

/// Collects a record type's table name and ordered field declarations.
///
/// ```rust,ignore
/// fn declare(s: &mut SchemaBuilder) {
///     s.table("events");
///     s.field("Id", FieldKind::U64).primary_key();
///     s.field("OwnerId", FieldKind::U64).owner_reference().filterable();
///     s.field("Title", FieldKind::String).filterable().validate(FieldRule::NotEmpty);
///     s.field("IsRemoved", FieldKind::Bool).soft_delete();
/// }
/// ```
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    pub(crate) table: Option<String>,
    pub(crate) fields: Vec<FieldDescriptor>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&mut self, name: &str) -> &mut Self {
        self.table = Some(name.to_string());
        self
    }

    pub fn field(&mut self, name: &str, kind: FieldKind) -> FieldBuilder<'_> {
        self.fields.push(FieldDescriptor::new(name, kind));
        let idx = self.fields.len() - 1;
        FieldBuilder {
            field: &mut self.fields[idx],
        }
    }
}

pub struct FieldBuilder<'a> {
    field: &'a mut FieldDescriptor,
}

impl<'a> FieldBuilder<'a> {
    pub fn fill_name(self, name: &str) -> Self {
        self.field.fill_name = name.to_string();
        self
    }

    pub fn export_name(self, name: &str) -> Self {
        self.field.export_name = name.to_string();
        self
    }

    /// Sets both wire names at once.
    pub fn wire_name(self, name: &str) -> Self {
        self.fill_name(name).export_name(name)
    }

    pub fn column(self, name: &str) -> Self {
        self.field.column = name.to_string();
        self
    }

    pub fn min_write_role(self, role: u8) -> Self {
        self.field.min_write_role = role;
        self
    }

    pub fn admin_only(self) -> Self {
        self.field.admin_only = true;
        self
    }

    pub fn owner_reference(self) -> Self {
        self.field.owner_reference = true;
        self
    }

    pub fn soft_delete(self) -> Self {
        self.field.soft_delete = true;
        self
    }

    pub fn internal(self) -> Self {
        self.field.internal = true;
        self
    }

    pub fn filterable(self) -> Self {
        self.field.filterable = true;
        self
    }

    pub fn read_only(self) -> Self {
        self.field.read_only = true;
        self
    }

    pub fn primary_key(self) -> Self {
        self.field.primary_key = true;
        self
    }

    pub fn nullable(self) -> Self {
        self.field.nullable = true;
        self
    }

    pub fn validate(self, rule: FieldRule) -> Self {
        self.field.rules.push(rule);
        self
    }
}
