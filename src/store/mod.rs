//! Bitemporal, checkpoint-indexed entity store.
//!
//! `IndexingStore` is a small async trait with Postgres and SQLite
//! implementations sharing connection-pool setup, covering many versioned
//! rows per table, keyed by checkpoint.

pub mod namespace;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;
pub mod revert;
pub mod serialize;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointBound};
use crate::error::{StoreError, StoreResult};
use crate::schema::Schema;
use crate::store::query::{FindManyArgs, Page};
use crate::store::value::{Row, Scalar};

/// Emit the `indexing_store_method_duration` histogram, labeled by backend,
/// method, and table. A no-op unless the
/// `metrics` feature is enabled.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub(crate) fn record_method_duration(backend: &str, method: &str, table: &str, duration: std::time::Duration) {
    #[cfg(feature = "metrics")]
    {
        metrics::histogram!(
            "indexing_store_method_duration",
            duration.as_secs_f64(),
            "backend" => backend.to_string(),
            "method" => method.to_string(),
            "table" => table.to_string(),
        );
    }
    let _ = (backend, method, table, duration);
}

/// A single `createMany`/`updateMany` item: the row's id and the column
/// values to write (a full row for `create`, a partial patch for `update`).
#[derive(Debug, Clone)]
pub struct RowWrite {
    pub id: Scalar,
    pub row: Row,
}

/// Which single-row write rule `write_one` applies when it finds (or
/// doesn't find) a current version for the target id:
///
/// - `Create`: fails with [`crate::error::StoreError::AlreadyExists`] if a
///   current version exists, regardless of checkpoint ordering.
/// - `Update`: fails with [`crate::error::StoreError::NotFound`] if none
///   exists; otherwise squashes or branches per the usual rule.
/// - `Upsert`: inserts if none exists, otherwise squashes or branches like
///   `Update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
    Upsert,
}

/// Reconstruct a typed [`Scalar`] from a `findMany` page cursor string
/// according to the id column's declared type, so the cursor comparison in
/// `find_many` compares like-for-like instead of always quoting the cursor
/// as text (which Postgres rejects for non-text columns).
#[must_use]
pub(crate) fn cursor_to_scalar(id_column: &crate::schema::Column, cursor: &str) -> Scalar {
    match &id_column.ty {
        crate::schema::ColumnType::Int => cursor.parse::<i64>().map_or_else(|_| Scalar::Str(cursor.to_string()), Scalar::Int),
        crate::schema::ColumnType::BigInt => Scalar::BigInt(cursor.to_string()),
        crate::schema::ColumnType::Bytes => Scalar::Bytes(cursor.to_string()),
        _ => Scalar::Str(cursor.to_string()),
    }
}

/// Bitemporal, checkpoint-indexed relational entity store.
///
/// # Design Principles
///
/// - **Atomicity**: each write is one transaction; a `createMany`/`updateMany`
///   batch either fully lands or fully rolls back.
/// - **Squash vs branch**: a write at the same checkpoint as the row's
///   current `effectiveFromCheckpoint` collapses into the existing version;
///   a write at a later checkpoint truncates the current version and opens
///   a new one.
/// - **Reorg safety**: `revert` deletes versions opened at or after the
///   given checkpoint and reopens versions closed at or after it, and must
///   be safe to call more than once for the same checkpoint.
#[async_trait]
pub trait IndexingStore: Send + Sync {
    /// Insert a new current version of `id`. Errors with
    /// [`crate::error::StoreError::PastWrite`] if a current version already
    /// exists at or after `checkpoint`.
    async fn create(
        &self,
        table: &str,
        id: Scalar,
        row: Row,
        checkpoint: Checkpoint,
    ) -> StoreResult<()>;

    /// Batched [`IndexingStore::create`], chunked at 1000 rows per statement
    ///
    async fn create_many(
        &self,
        table: &str,
        rows: Vec<RowWrite>,
        checkpoint: Checkpoint,
    ) -> StoreResult<()>;

    /// Apply `patch` to the current version of `id`, squashing if
    /// `checkpoint` equals the current version's `effectiveFromCheckpoint`,
    /// branching otherwise.
    async fn update(
        &self,
        table: &str,
        id: Scalar,
        patch: Row,
        checkpoint: Checkpoint,
    ) -> StoreResult<()>;

    /// Batched [`IndexingStore::update`], chunked at 1000 rows per statement.
    async fn update_many(
        &self,
        table: &str,
        patches: Vec<RowWrite>,
        checkpoint: Checkpoint,
    ) -> StoreResult<()>;

    /// `create` if `id` has no current version, `update` otherwise.
    async fn upsert(
        &self,
        table: &str,
        id: Scalar,
        row: Row,
        checkpoint: Checkpoint,
    ) -> StoreResult<()>;

    /// Close (or, if closing at the version's own `effectiveFromCheckpoint`,
    /// remove outright) the current version of `id` at `checkpoint`.
    async fn delete(&self, table: &str, id: Scalar, checkpoint: Checkpoint) -> StoreResult<()>;

    /// `update`, but the patch is computed from the current row rather than
    /// supplied directly (Design Note 9.2: the function sees decoded values,
    /// including `bigint`, so this must load the current version first
    /// rather than defer the merge to the backend). Fails with
    /// [`crate::error::StoreError::NotFound`] if `id` has no current
    /// version, same as [`IndexingStore::update`].
    async fn update_with<F>(&self, table: &str, id: Scalar, checkpoint: Checkpoint, patch_fn: F) -> StoreResult<()>
    where
        F: FnOnce(Row) -> Row + Send,
    {
        let current = self.find_unique_latest(table, &id).await?.ok_or_else(|| StoreError::NotFound {
            table: table.to_string(),
            id: format!("{id:?}"),
        })?;
        let patch = patch_fn(current);
        self.update(table, id, patch, checkpoint).await
    }

    /// `upsert`, but the update branch's patch is computed from the current
    /// row (see [`IndexingStore::update_with`]). `create_row` is used
    /// verbatim when `id` has no current version.
    async fn upsert_with<F>(
        &self,
        table: &str,
        id: Scalar,
        checkpoint: Checkpoint,
        create_row: Row,
        patch_fn: F,
    ) -> StoreResult<()>
    where
        F: FnOnce(Row) -> Row + Send,
    {
        match self.find_unique_latest(table, &id).await? {
            None => self.create(table, id, create_row, checkpoint).await,
            Some(current) => {
                let patch = patch_fn(current);
                self.update(table, id, patch, checkpoint).await
            }
        }
    }

    /// `updateMany`, but the patch is computed per row from its current
    /// value rather than supplied as one shared patch object. Selects
    /// current versions matching `where_args` (its `limit` bounds how many
    /// rows a single call updates, the same cap [`IndexingStore::find_many`]
    /// enforces) and applies `patch_fn` to each independently; order of
    /// application is unspecified. Returns the number of rows updated.
    async fn update_many_with<F>(
        &self,
        table: &str,
        where_args: FindManyArgs,
        checkpoint: Checkpoint,
        patch_fn: F,
    ) -> StoreResult<usize>
    where
        F: Fn(Row) -> Row + Send + Sync,
    {
        let id_column = self
            .schema()
            .table(table)
            .ok_or_else(|| StoreError::Other {
                message: format!("unknown table {table}"),
            })?
            .id_column
            .clone();
        let page = self.find_many_latest(table, where_args).await?;
        let mut count = 0usize;
        for row in page.items {
            let Some(id) = row.get(&id_column).cloned() else {
                continue;
            };
            let patch = patch_fn(row);
            self.update(table, id, patch, checkpoint).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Fetch the version of `id` valid as of `at`: the unique
    /// version with `effectiveFromCheckpoint <= at < effectiveToCheckpoint`,
    /// or the current version when `at` is [`CheckpointBound::Latest`].
    /// Returns `None` if no such version exists.
    async fn find_unique(&self, table: &str, id: &Scalar, at: CheckpointBound) -> StoreResult<Option<Row>>;

    /// Convenience for `find_unique(table, id, CheckpointBound::Latest)`.
    async fn find_unique_latest(&self, table: &str, id: &Scalar) -> StoreResult<Option<Row>> {
        self.find_unique(table, id, CheckpointBound::Latest).await
    }

    /// Fetch versions valid as of `at` matching `args`' filters, ordered and
    /// paged.
    async fn find_many(&self, table: &str, args: FindManyArgs, at: CheckpointBound) -> StoreResult<Page<Row>>;

    /// Convenience for `find_many(table, args, CheckpointBound::Latest)`.
    async fn find_many_latest(&self, table: &str, args: FindManyArgs) -> StoreResult<Page<Row>> {
        self.find_many(table, args, CheckpointBound::Latest).await
    }

    /// Reorg revert: delete versions opened at or
    /// after `safe_checkpoint`, reopen versions closed at or after it. Must
    /// be idempotent — calling it twice with the same `safe_checkpoint`
    /// leaves the store unchanged the second time.
    async fn revert(&self, table: &str, safe_checkpoint: Checkpoint) -> StoreResult<()>;

    /// Full version history of `id`, oldest first, including superseded and
    /// closed versions (not just the current one `find_unique` returns).
    async fn list_versions(&self, table: &str, id: &Scalar) -> StoreResult<Vec<crate::store::value::VersionedRow>>;

    /// The schema this store instance is bound to.
    fn schema(&self) -> &Schema;
}
