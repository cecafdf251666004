//! CrudConfig validation against the registered field map.

use crate::config::CrudConfig;
use crate::error::ConfigError;
use crate::schema::{FieldsMapping, Record};
use std::collections::HashSet;

pub fn validate_crud_config<R: Record>(config: &CrudConfig<R>, mapping: &FieldsMapping) -> Result<(), ConfigError> {
    let list = &config.list;

    for name in &list.disabled {
        if mapping.by_fill_name(name).is_none() {
            return Err(ConfigError::UnknownField {
                field: name.clone(),
                context: format!("disable_filter on {}", mapping.type_name),
            });
        }
    }

    let mut has_many_names = HashSet::new();
    for hm in &list.has_many {
        if mapping.by_fill_name(&hm.name).is_some() {
            return Err(ConfigError::Validation(format!(
                "has-many filter `{}` shadows a field of {}",
                hm.name, mapping.type_name
            )));
        }
        if !has_many_names.insert(hm.name.as_str()) {
            return Err(ConfigError::DuplicateName(hm.name.clone()));
        }
    }

    for pq in list.predefined.values() {
        if let Some(sort) = &pq.sort_field {
            if !mapping.is_filterable(sort) {
                return Err(ConfigError::UnknownField {
                    field: sort.clone(),
                    context: format!("sort of predefined query `{}`", pq.name),
                });
            }
        }
    }

    let mut suffixes = HashSet::new();
    for (suffix, _) in &config.related {
        if suffix.is_empty() || suffix.contains('/') {
            return Err(ConfigError::Validation(format!("invalid related path suffix `{}`", suffix)));
        }
        if !suffixes.insert(suffix.as_str()) {
            return Err(ConfigError::DuplicateName(suffix.clone()));
        }
    }

    if let Some(table) = &config.relation_table {
        if table.is_empty() || table == &mapping.table {
            return Err(ConfigError::Validation(format!(
                "relation table for {} must be a separate table",
                mapping.type_name
            )));
        }
    }

    if let Some(perm) = &config.permission_table {
        if perm.table.is_empty() || perm.table == mapping.table {
            return Err(ConfigError::Validation(format!(
                "permission table for {} must be a separate table",
                mapping.type_name
            )));
        }
    }

    if let Some(per_page) = list.per_page {
        if per_page == 0 {
            return Err(ConfigError::Validation("per_page must be positive".into()));
        }
    }
    Ok(())
}
