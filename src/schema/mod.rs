//! Runtime schema values: table/column descriptors and the scalar/storage
//! type mapping table.
//!
//! A [`Schema`] is a first-class runtime value, not a compile-time type: the
//! store walks it to decide how to serialize a [`crate::store::value::Scalar`]
//! into SQL and back, keeping the column model as pure data with no I/O
//! baked in.

mod validate;

pub use validate::validate;

use serde::{Deserialize, Serialize};

use crate::config::Backend;

/// The reserved column names the store itself manages on every table.
pub const EFFECTIVE_FROM: &str = "effectiveFromCheckpoint";
pub const EFFECTIVE_TO: &str = "effectiveToCheckpoint";

/// The declared type of a column, independent of nullability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Int,
    Float,
    String,
    BigInt,
    Bytes,
    /// Reference to a named enum's declared values.
    Enum(String),
    /// Foreign key to another table's id column.
    Reference(String),
    /// A homogeneous list of the inner type, stored as JSON text.
    List(Box<ColumnType>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub optional: bool,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub id_column: String,
    pub columns: Vec<Column>,
}

impl Table {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn id(&self) -> &Column {
        self.column(&self.id_column)
            .expect("id_column must reference a declared column; validate() enforces this")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    pub enums: Vec<EnumDef>,
}

impl Schema {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Validate every table invariant: reserved-column rejection,
    /// non-optional/non-list id columns, dangling references, duplicate
    /// and empty-string enum values, duplicate table names.
    pub fn validate(&self) -> crate::error::SchemaResult<()> {
        validate::validate(self)
    }
}

/// Map a declared column type to the on-disk SQL type for the given backend
/// (the storage type mapping table).
#[must_use]
pub fn storage_type(ty: &ColumnType, backend: Backend) -> String {
    match ty {
        ColumnType::Boolean => "INTEGER".to_string(),
        ColumnType::Int => "INTEGER".to_string(),
        ColumnType::Float => "TEXT".to_string(),
        ColumnType::String => "TEXT".to_string(),
        ColumnType::BigInt => match backend {
            #[cfg(feature = "postgres")]
            Backend::Postgres => "NUMERIC(78,0)".to_string(),
            #[cfg(feature = "sqlite")]
            Backend::Sqlite => "TEXT".to_string(),
        },
        ColumnType::Bytes => "TEXT".to_string(),
        ColumnType::Enum(_) => "TEXT".to_string(),
        ColumnType::Reference(_) => "TEXT".to_string(),
        // Stored as JSON text on both backends (spec storage mapping
        // "list of T -> text (JSON)"), not JSONB: the store decodes list
        // columns by reading a plain TEXT/String value and parsing it as
        // JSON, so the physical column type must match on both backends.
        ColumnType::List(_) => "TEXT".to_string(),
    }
}
