//! Per-field metadata derived once from a record declaration.

use crate::service::FieldRule;

/// Native value kind of a declared field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F64,
    Bool,
    String,
    /// Stored as a timestamp, exchanged on the wire as Unix-epoch seconds.
    Timestamp,
    /// List of u64 ids.
    IdList,
    /// Nested record or any other type handled by a registered codec, keyed by type name.
    Custom(String),
}

impl FieldKind {
    pub fn name(&self) -> &str {
        match self {
            FieldKind::I8 => "i8",
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::F64 => "f64",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Timestamp => "timestamp",
            FieldKind::IdList => "id_list",
            FieldKind::Custom(name) => name.as_str(),
        }
    }

    /// PostgreSQL column type used by `migration::ensure_table`. Unsigned kinds widen to the
    /// next signed type; u64 is stored as BIGINT.
    pub fn pg_type(&self) -> &'static str {
        match self {
            FieldKind::I8 | FieldKind::I16 | FieldKind::U8 => "SMALLINT",
            FieldKind::I32 | FieldKind::U16 => "INTEGER",
            FieldKind::I64 | FieldKind::U32 | FieldKind::U64 => "BIGINT",
            FieldKind::F64 => "DOUBLE PRECISION",
            FieldKind::Bool => "BOOLEAN",
            FieldKind::String => "TEXT",
            FieldKind::Timestamp => "TIMESTAMPTZ",
            FieldKind::IdList | FieldKind::Custom(_) => "JSONB",
        }
    }

    /// SQL cast applied to bound parameters whose wire type differs from the column type.
    pub fn bind_cast(&self) -> Option<&'static str> {
        match self {
            FieldKind::Timestamp => Some("timestamptz"),
            FieldKind::IdList | FieldKind::Custom(_) => Some("jsonb"),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldKind::I8
                | FieldKind::I16
                | FieldKind::I32
                | FieldKind::I64
                | FieldKind::U8
                | FieldKind::U16
                | FieldKind::U32
                | FieldKind::U64
        )
    }
}

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    /// Declared (CamelCase) name; the key passed to `Record::get`/`Record::set`.
    pub name: String,
    pub fill_name: String,
    pub export_name: String,
    pub column: String,
    pub kind: FieldKind,
    /// Role group allowed to write this field; 0 = unrestricted.
    pub min_write_role: u8,
    pub admin_only: bool,
    pub owner_reference: bool,
    pub soft_delete: bool,
    pub internal: bool,
    pub filterable: bool,
    pub read_only: bool,
    pub primary_key: bool,
    pub nullable: bool,
    pub rules: Vec<FieldRule>,
    /// Set when the declaration conflicts with a sibling; the field is then neither filled nor exported.
    pub invalid: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        let snake = crate::case::to_snake_case(name);
        FieldDescriptor {
            name: name.to_string(),
            fill_name: snake.clone(),
            export_name: snake.clone(),
            column: snake,
            kind,
            min_write_role: 0,
            admin_only: false,
            owner_reference: false,
            soft_delete: false,
            internal: false,
            filterable: false,
            read_only: false,
            primary_key: false,
            nullable: false,
            rules: Vec::new(),
            invalid: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }

    pub fn fillable(&self) -> bool {
        self.is_valid() && !self.internal && !self.read_only && !self.primary_key
    }

    pub fn outable(&self) -> bool {
        self.is_valid() && !self.internal
    }
}
