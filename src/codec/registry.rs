//! Custom field-type codecs, keyed by type name. Filled at bootstrap, then shared read-only.

use serde_json::Value;
use std::collections::HashMap;

/// Wire value -> stored JSON value.
pub type CodecFill = fn(&Value) -> Result<Value, String>;
/// Stored JSON value -> wire value.
pub type CodecExport = fn(&Value) -> Result<Value, String>;

#[derive(Clone, Copy)]
pub struct CustomCodec {
    pub fill: CodecFill,
    pub export: CodecExport,
}

#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, CustomCodec>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: &str, fill: CodecFill, export: CodecExport) -> &mut Self {
        if self
            .codecs
            .insert(type_name.to_string(), CustomCodec { fill, export })
            .is_some()
        {
            tracing::warn!(type_name = %type_name, "custom codec replaced");
        }
        self
    }

    pub fn get(&self, type_name: &str) -> Option<CustomCodec> {
        self.codecs.get(type_name).copied()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.codecs.contains_key(type_name)
    }
}
