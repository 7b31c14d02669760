//! Dynamic row representation (Design Note 9.1): a tagged `Scalar` enum
//! instead of an untyped map, so serialize/deserialize is a typed walk over
//! the `Schema` rather than duck-typed dictionary access.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One column's value. `List` is recursive so `List<List<Int>>`-shaped
/// columns round-trip, even though the schema only declares one level of
/// nesting today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Arbitrary-precision integer, carried as decimal text end to end so it
    /// never loses precision crossing the `i64`/`f64` boundary.
    BigInt(String),
    /// Lowercase-normalized hex string (`0x...`).
    Bytes(String),
    List(Vec<Scalar>),
    Null,
}

impl Scalar {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) | Scalar::Bytes(s) | Scalar::BigInt(s) => Some(s),
            _ => None,
        }
    }

    /// Render any id-eligible scalar (`string | int | bigint | bytes`) as a
    /// string, for use as a `findMany` page cursor. Unlike
    /// [`Scalar::as_str`], this also covers `Int` so cursor pagination
    /// doesn't silently stop advancing on integer-typed id columns.
    #[must_use]
    pub fn as_cursor(&self) -> Option<String> {
        match self {
            Scalar::Str(s) | Scalar::Bytes(s) | Scalar::BigInt(s) => Some(s.clone()),
            Scalar::Int(v) => Some(v.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// A row's user-visible columns, keyed by column name. `BTreeMap` keeps
/// iteration order deterministic for SQL statement building and tests.
pub type Row = BTreeMap<String, Scalar>;

/// A single stored version of a row: its user columns plus the bitemporal
/// bookkeeping columns the store manages.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedRow {
    pub id: Scalar,
    pub row: Row,
    pub effective_from: crate::checkpoint::Checkpoint,
    pub effective_to: crate::checkpoint::CheckpointBound,
}
