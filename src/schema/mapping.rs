//! FieldsMapping: the immutable per-type field map built at registration.

use crate::error::ConfigError;
use crate::schema::{FieldDescriptor, FieldKind, SchemaBuilder};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug)]
pub struct FieldsMapping {
    pub type_name: String,
    pub table: String,
    /// All declared fields in declaration order, including invalid ones.
    pub fields: Vec<FieldDescriptor>,
    /// Declared names of fillable fields, in declaration order.
    pub fillable: Vec<String>,
    /// Declared names of outable fields, in declaration order.
    pub outable: Vec<String>,
    /// Fill name -> declared name.
    pub reverse_fill: HashMap<String, String>,
    /// Fill names clients may filter and sort on.
    pub filterable: HashSet<String>,
    pub primary_key: String,
    pub owner_reference: Option<String>,
    pub soft_delete: Option<String>,
    pub has_custom_fill: bool,
    pub has_custom_export: bool,
    pub has_update_hook: bool,
    index: HashMap<String, usize>,
}

impl FieldsMapping {
    /// Build the mapping. Conflicting declarations only invalidate the offending field; a type
    /// without a table or primary key cannot be served at all.
    pub fn build(type_name: &str, builder: SchemaBuilder) -> Result<Self, ConfigError> {
        let table = builder.table.ok_or_else(|| ConfigError::MissingTable {
            record: type_name.to_string(),
        })?;
        let mut fields = builder.fields;

        let mut seen_fill: HashSet<String> = HashSet::new();
        let mut seen_export: HashSet<String> = HashSet::new();
        let mut seen_declared: HashSet<String> = HashSet::new();
        let mut owner_reference = None;
        let mut soft_delete = None;

        for f in fields.iter_mut() {
            if !seen_declared.insert(f.name.clone()) {
                f.invalid = Some(format!("field `{}` declared twice", f.name));
            } else if !f.internal {
                if seen_fill.contains(&f.fill_name) {
                    f.invalid = Some(format!("duplicate fill name `{}`", f.fill_name));
                } else if seen_export.contains(&f.export_name) {
                    f.invalid = Some(format!("duplicate export name `{}`", f.export_name));
                } else {
                    seen_fill.insert(f.fill_name.clone());
                    seen_export.insert(f.export_name.clone());
                }
            }
            if let Some(reason) = &f.invalid {
                tracing::warn!(record = %type_name, field = %f.name, "{}, field excluded", reason);
                continue;
            }

            if f.owner_reference {
                if owner_reference.is_some() {
                    tracing::warn!(record = %type_name, field = %f.name, "second owner reference ignored");
                    f.owner_reference = false;
                } else {
                    owner_reference = Some(f.name.clone());
                }
            }
            if f.soft_delete {
                if f.kind != FieldKind::Bool {
                    tracing::warn!(record = %type_name, field = %f.name, "soft delete flag requires a bool field, ignored");
                    f.soft_delete = false;
                } else if soft_delete.is_some() {
                    tracing::warn!(record = %type_name, field = %f.name, "second soft delete field ignored");
                    f.soft_delete = false;
                } else {
                    soft_delete = Some(f.name.clone());
                }
            }
        }

        let primary_key = fields
            .iter()
            .find(|f| f.primary_key && f.is_valid())
            .or_else(|| fields.iter().find(|f| f.name == "Id" && f.is_valid()))
            .map(|f| f.name.clone())
            .ok_or_else(|| ConfigError::MissingPrimaryKey {
                record: type_name.to_string(),
            })?;
        for f in fields.iter_mut() {
            f.primary_key = f.name == primary_key;
        }

        let index = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_valid())
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let fillable = fields.iter().filter(|f| f.fillable()).map(|f| f.name.clone()).collect();
        let outable = fields.iter().filter(|f| f.outable()).map(|f| f.name.clone()).collect();
        let reverse_fill = fields
            .iter()
            .filter(|f| f.is_valid() && !f.internal)
            .map(|f| (f.fill_name.clone(), f.name.clone()))
            .collect();
        let filterable = fields
            .iter()
            .filter(|f| f.is_valid() && !f.internal && f.filterable)
            .map(|f| f.fill_name.clone())
            .collect();

        Ok(FieldsMapping {
            type_name: type_name.to_string(),
            table,
            fields,
            fillable,
            outable,
            reverse_fill,
            filterable,
            primary_key,
            owner_reference,
            soft_delete,
            has_custom_fill: false,
            has_custom_export: false,
            has_update_hook: false,
            index,
        })
    }

    /// Valid field by declared name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn by_fill_name(&self, fill_name: &str) -> Option<&FieldDescriptor> {
        self.reverse_fill.get(fill_name).and_then(|n| self.field(n))
    }

    pub fn primary(&self) -> &FieldDescriptor {
        &self.fields[self.index[&self.primary_key]]
    }

    pub fn owner_field(&self) -> Option<&FieldDescriptor> {
        self.owner_reference.as_deref().and_then(|n| self.field(n))
    }

    pub fn soft_delete_field(&self) -> Option<&FieldDescriptor> {
        self.soft_delete.as_deref().and_then(|n| self.field(n))
    }

    pub fn is_filterable(&self, fill_name: &str) -> bool {
        self.filterable.contains(fill_name)
    }

    /// Valid fields in declaration order.
    pub fn valid_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_valid())
    }
}
