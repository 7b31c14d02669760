//! Crate-wide error taxonomy.
//!
//! One `thiserror` enum per concern, each carrying `miette::Diagnostic`
//! codes: a handful of named variants for conditions callers are expected
//! to match on, plus a `Backend { message }` / `Other { message }` catch-all
//! for driver-level failures that don't earn a dedicated variant.

use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// Errors from the bitemporal entity store (`IndexingStore` and friends).
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// `findUnique`/`update`/`delete` targeted a row that doesn't exist.
    #[error("row not found: table={table} id={id}")]
    #[diagnostic(
        code(chainloom::store::not_found),
        help("Check that a row with this id was ever created in table `{table}`.")
    )]
    NotFound { table: String, id: String },

    /// `create` targeted an id that already has a current
    /// (`effectiveToCheckpoint = "latest"`) version.
    #[error("row already exists: table={table} id={id}")]
    #[diagnostic(
        code(chainloom::store::already_exists),
        help("Use `update`/`upsert` to modify an existing row in table `{table}`.")
    )]
    AlreadyExists { table: String, id: String },

    /// A write targeted a checkpoint earlier than the row's current state
    /// allows — the store is append/branch-only, never backdated.
    #[error("write at checkpoint {attempted} is not after current checkpoint {current} for table={table} id={id}")]
    #[diagnostic(
        code(chainloom::store::past_write),
        help("Writes must occur at or after the row's latest effectiveFromCheckpoint.")
    )]
    PastWrite {
        table: String,
        id: String,
        attempted: String,
        current: String,
    },

    /// A row value didn't fit the declared column schema (wrong scalar kind,
    /// dangling reference, etc).
    #[error("schema conflict in table={table} column={column}: {message}")]
    #[diagnostic(code(chainloom::store::schema_conflict))]
    SchemaConflict {
        table: String,
        column: String,
        message: String,
    },

    /// A page-size or filter argument violated the store's configured limits.
    #[error("invalid query: {message}")]
    #[diagnostic(code(chainloom::store::invalid_query))]
    InvalidQuery { message: String },

    /// Checkpoint codec failure surfaced up through a store operation.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Backend storage error (database driver, connection pool, etc.).
    #[error("backend error: {message}")]
    #[diagnostic(
        code(chainloom::store::backend),
        help("Check backend connectivity and permissions; backend message: {message}.")
    )]
    Backend { message: String },

    /// Other store errors.
    #[error("store error: {message}")]
    #[diagnostic(code(chainloom::store::other))]
    Other { message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from schema construction/validation (`schema::Schema::validate`).
#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("table {table} declares no id column")]
    #[diagnostic(
        code(chainloom::schema::missing_id),
        help("Every table needs exactly one non-optional, non-list `id` column.")
    )]
    MissingId { table: String },

    #[error("table {table} id column must not be optional or a list")]
    #[diagnostic(code(chainloom::schema::invalid_id))]
    InvalidId { table: String },

    #[error("table {table} column {column} is reserved")]
    #[diagnostic(
        code(chainloom::schema::reserved_column),
        help("`effectiveFromCheckpoint` and `effectiveToCheckpoint` are managed by the store.")
    )]
    ReservedColumn { table: String, column: String },

    #[error("enum {name} declares duplicate value {value}")]
    #[diagnostic(code(chainloom::schema::duplicate_enum_value))]
    DuplicateEnumValue { name: String, value: String },

    #[error("enum {name} declares an empty string value")]
    #[diagnostic(
        code(chainloom::schema::empty_enum_value),
        help("Enum values must be non-empty strings.")
    )]
    EmptyEnumValue { name: String },

    #[error("table {table} column {column} references unknown table {target}")]
    #[diagnostic(code(chainloom::schema::dangling_reference))]
    DanglingReference {
        table: String,
        column: String,
        target: String,
    },

    #[error("table {table} declared more than once")]
    #[diagnostic(code(chainloom::schema::duplicate_table))]
    DuplicateTable { table: String },
}

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// Errors from the JSON-RPC request/cache layer.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    /// The underlying transport returned a JSON-RPC error response.
    #[error("rpc error {code}: {message}")]
    #[diagnostic(code(chainloom::rpc::error_response))]
    ErrorResponse { code: i64, message: String },

    /// The queue was cleared or paused before this request could be dispatched.
    #[error("request dropped: {reason}")]
    #[diagnostic(code(chainloom::rpc::dropped))]
    Dropped { reason: String },

    /// Transport-level failure (connection refused, timeout, decode failure).
    #[error("transport error: {message}")]
    #[diagnostic(code(chainloom::rpc::transport))]
    Backend { message: String },

    /// Other transport errors.
    #[error("transport error: {message}")]
    #[diagnostic(code(chainloom::rpc::other))]
    Other { message: String },
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors from namespace lifecycle management (private schema / publish).
#[derive(Debug, Error, Diagnostic)]
pub enum NamespaceError {
    /// Returned internally when `close()` observes the manager was already
    /// closed; callers never see this surfaced as an `Err` since a second
    /// close is swallowed as a no-op.
    #[error("namespace already closed")]
    #[diagnostic(
        code(chainloom::namespace::double_close),
        help("close() is idempotent; this is logged and swallowed rather than returned.")
    )]
    DoubleClose,

    #[error("namespace corruption: {message}")]
    #[diagnostic(code(chainloom::namespace::corruption))]
    Corruption { message: String },

    #[error("backend error: {message}")]
    #[diagnostic(code(chainloom::namespace::backend))]
    Backend { message: String },

    #[error("namespace error: {message}")]
    #[diagnostic(code(chainloom::namespace::other))]
    Other { message: String },
}

pub type NamespaceResult<T> = std::result::Result<T, NamespaceError>;

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<sqlx::Error> for TransportError {
    fn from(e: sqlx::Error) -> Self {
        TransportError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<sqlx::Error> for NamespaceError {
    fn from(e: sqlx::Error) -> Self {
        NamespaceError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for NamespaceError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        NamespaceError::Backend {
            message: e.to_string(),
        }
    }
}
