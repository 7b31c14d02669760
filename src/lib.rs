//! # chainloom
//!
//! Core of a blockchain indexing framework: a rate-limited, cacheable
//! JSON-RPC request layer, and a bitemporal, checkpoint-indexed relational
//! store of user-defined entities.
//!
//! ## Modules
//!
//! - [`checkpoint`] — totally-ordered chain position, lex-sortable encoding
//! - [`schema`] — user-declared tables/columns/enums as a runtime value
//! - [`queue`] — per-network rate-limited FIFO request queue over an RPC transport
//! - [`rpc`] — cached RPC transport wrapper memoizing side-effect-free calls
//! - [`store`] — the bitemporal `IndexingStore`, namespace lifecycle, reorg revert
//! - [`config`] — environment-driven runtime configuration
//! - [`error`] — crate-wide error taxonomy
//! - [`telemetry`] — `tracing` subscriber setup
//!
//! ## Quick start
//!
//! ```no_run
//! use chainloom::checkpoint::Checkpoint;
//! use chainloom::config::StoreConfig;
//! use chainloom::schema::{Column, ColumnType, Schema, Table};
//! use chainloom::store::sqlite::SqliteIndexingStore;
//! use chainloom::store::IndexingStore;
//! use chainloom::store::value::Scalar;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema {
//!     tables: vec![Table {
//!         name: "Token".to_string(),
//!         id_column: "id".to_string(),
//!         columns: vec![
//!             Column::new("id", ColumnType::String),
//!             Column::new("supply", ColumnType::BigInt),
//!         ],
//!     }],
//!     enums: vec![],
//! };
//!
//! let config = StoreConfig::new(Some("sqlite::memory:".to_string()));
//! let store = SqliteIndexingStore::connect(&config.database_url, config.pool, schema).await?;
//!
//! let checkpoint = Checkpoint::new(1_700_000_000, 1, 19_000_000, 0, 0);
//! let mut row = chainloom::store::value::Row::new();
//! row.insert("supply".to_string(), Scalar::BigInt("0".to_string()));
//! store.create("Token", Scalar::Str("0x1".to_string()), row, checkpoint).await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod queue;
pub mod rpc;
pub mod schema;
pub mod store;
pub mod telemetry;
