//! Namespace manager: a private schema per run, with
//! atomic publish to a stable public schema once the run reaches a safe
//! point.
//!
//! Table shape comes from a runtime [`Schema`] value, so DDL is generated
//! text rather than `sqlx::migrate!` migrations — the same "runtime value
//! describes the columns, core code renders the SQL" split used by
//! [`crate::store::serialize`] for row values.

use async_trait::async_trait;

use crate::config::Backend;
use crate::error::{NamespaceError, NamespaceResult};
use crate::schema::{storage_type, Schema, Table, EFFECTIVE_FROM, EFFECTIVE_TO};

/// Registry row lifecycle tracked in `public.ponder_metadata`.
#[derive(Debug, Clone)]
pub struct NamespaceMetadata {
    pub namespace_version: String,
    pub schema_json: String,
    pub is_published: bool,
}

/// Generate a monotonic tag for a new private namespace: the current
/// millisecond timestamp (a run creates a private namespace
/// named with a monotonic tag, e.g. a millisecond timestamp"). Callers that
/// need strict monotonicity across namespaces created in the same
/// millisecond (unit tests, back-to-back `reload`s) should bump the result
/// themselves.
#[must_use]
pub fn generate_namespace_tag() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Render the `CREATE TABLE <name>_versioned (...)` statement for one table,
/// including the bitemporal bookkeeping columns and the composite primary
/// key.
#[must_use]
pub fn versioned_table_ddl(qualified_name: &str, table: &Table, backend: Backend) -> String {
    let mut columns = Vec::new();
    for column in &table.columns {
        let ty = storage_type(&column.ty, backend);
        let null = if column.name == table.id_column || !column.optional {
            "NOT NULL"
        } else {
            ""
        };
        columns.push(format!("{} {ty} {null}", column.name).trim().to_string());
    }
    columns.push(format!("{EFFECTIVE_FROM} VARCHAR(58) NOT NULL"));
    columns.push(format!("{EFFECTIVE_TO} VARCHAR(58) NOT NULL"));
    columns.push(format!("PRIMARY KEY ({}, {EFFECTIVE_TO})", table.id_column));

    format!(
        "CREATE TABLE {qualified_name} (\n  {}\n)",
        columns.join(",\n  ")
    )
}

/// Render a CHECK constraint restricting `column` to `enum_values`.
#[must_use]
pub fn enum_check_clause(column: &str, enum_values: &[String]) -> String {
    let list = enum_values
        .iter()
        .map(|v| crate::store::serialize::quote(v))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CHECK ({column} IN ({list}))")
}

/// Lifecycle of a run's private namespace: create it, install its tables,
/// and eventually publish it to the stable public views.
#[async_trait]
pub trait NamespaceManager: Send + Sync {
    /// The private namespace name this manager owns (e.g. `ponder_<tag>`).
    fn namespace(&self) -> &str;

    /// Create the private schema if absent, upsert its `ponder_metadata`
    /// row, and (re)create each `<table>_versioned` table from `schema`.
    async fn reload(&self, schema: &Schema) -> NamespaceResult<()>;

    /// Atomically mark this namespace published, drop older namespaces, and
    /// install the stable public views.
    async fn publish(&self) -> NamespaceResult<()>;

    /// Close the underlying connection pool. Idempotent: a second call
    /// observes the manager already closed, logs it, and returns `Ok(())`
    /// rather than propagating `NamespaceError::DoubleClose`.
    async fn close(&self) -> NamespaceResult<()>;
}

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::instrument;

    pub struct PostgresNamespaceManager {
        pool: Arc<PgPool>,
        namespace: String,
        prefix: String,
        closed: AtomicBool,
    }

    impl PostgresNamespaceManager {
        #[must_use]
        pub fn new(pool: Arc<PgPool>, prefix: &str, tag: u64) -> Self {
            Self {
                pool,
                namespace: format!("{prefix}_{tag}"),
                prefix: prefix.to_string(),
                closed: AtomicBool::new(false),
            }
        }

        fn qualified(&self, table: &str) -> String {
            format!("{}.{}_versioned", self.namespace, table)
        }
    }

    #[async_trait]
    impl NamespaceManager for PostgresNamespaceManager {
        fn namespace(&self) -> &str {
            &self.namespace
        }

        #[instrument(skip(self, schema))]
        async fn reload(&self, schema: &Schema) -> NamespaceResult<()> {
            let mut tx = self.pool.begin().await.map_err(NamespaceError::from)?;

            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.namespace))
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS public.ponder_metadata ( \
                    namespace_version TEXT PRIMARY KEY, \
                    schema JSONB NOT NULL, \
                    is_published BOOLEAN NOT NULL DEFAULT false \
                )",
            )
            .execute(&mut *tx)
            .await
            .map_err(NamespaceError::from)?;

            let schema_json = serde_json::to_value(schema).map_err(|e| NamespaceError::Other {
                message: format!("failed to serialize schema: {e}"),
            })?;
            sqlx::query(
                "INSERT INTO public.ponder_metadata (namespace_version, schema, is_published) \
                 VALUES ($1, $2, false) \
                 ON CONFLICT (namespace_version) DO UPDATE SET schema = excluded.schema",
            )
            .bind(&self.namespace)
            .bind(&schema_json)
            .execute(&mut *tx)
            .await
            .map_err(NamespaceError::from)?;

            for table in &schema.tables {
                let qualified = self.qualified(&table.name);
                sqlx::query(&format!("DROP TABLE IF EXISTS {qualified}"))
                    .execute(&mut *tx)
                    .await
                    .map_err(NamespaceError::from)?;

                let mut ddl = versioned_table_ddl(&qualified, table, Backend::Postgres);
                for column in &table.columns {
                    if let crate::schema::ColumnType::Enum(name) = &column.ty {
                        if let Some(def) = schema.enum_def(name) {
                            let check = enum_check_clause(&column.name, &def.values);
                            ddl = ddl.trim_end_matches(')').to_string() + &format!(",\n  {check}\n)");
                        }
                    }
                }
                sqlx::query(&ddl).execute(&mut *tx).await.map_err(NamespaceError::from)?;
            }

            tx.commit().await.map_err(NamespaceError::from)?;
            Ok(())
        }

        #[instrument(skip(self))]
        async fn publish(&self) -> NamespaceResult<()> {
            let mut tx = self.pool.begin().await.map_err(NamespaceError::from)?;

            sqlx::query("UPDATE public.ponder_metadata SET is_published = true WHERE namespace_version = $1")
                .bind(&self.namespace)
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;

            sqlx::query("DELETE FROM public.ponder_metadata WHERE namespace_version <> $1")
                .bind(&self.namespace)
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;

            let schema_row = sqlx::query("SELECT schema FROM public.ponder_metadata WHERE namespace_version = $1")
                .bind(&self.namespace)
                .fetch_optional(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;
            let Some(schema_row) = schema_row else {
                return Err(NamespaceError::Corruption {
                    message: format!("no ponder_metadata row for namespace {}", self.namespace),
                });
            };
            let schema_json: serde_json::Value = schema_row.get("schema");
            let schema: Schema = serde_json::from_value(schema_json).map_err(|e| NamespaceError::Other {
                message: format!("failed to deserialize stored schema: {e}"),
            })?;

            let other_schemas: Vec<String> = sqlx::query(
                "SELECT schema_name FROM information_schema.schemata \
                 WHERE schema_name LIKE $1 AND schema_name <> $2",
            )
            .bind(format!("{}_%", self.prefix))
            .bind(&self.namespace)
            .fetch_all(&mut *tx)
            .await
            .map_err(NamespaceError::from)?
            .into_iter()
            .map(|r| r.get::<String, _>("schema_name"))
            .collect();

            for table in &schema.tables {
                sqlx::query(&format!("DROP VIEW IF EXISTS public.{}_versioned", table.name))
                    .execute(&mut *tx)
                    .await
                    .map_err(NamespaceError::from)?;
                sqlx::query(&format!("DROP VIEW IF EXISTS public.{}", table.name))
                    .execute(&mut *tx)
                    .await
                    .map_err(NamespaceError::from)?;
                sqlx::query(&format!(
                    "CREATE VIEW public.{0}_versioned AS SELECT * FROM {1}.{0}_versioned",
                    table.name, self.namespace
                ))
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;
                sqlx::query(&format!(
                    "CREATE VIEW public.{0} AS SELECT * FROM {1}.{0}_versioned WHERE {2} = 'latest'",
                    table.name, self.namespace, EFFECTIVE_TO
                ))
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;
            }

            tx.commit().await.map_err(NamespaceError::from)?;

            self.drop_stale_schemas(other_schemas).await;

            Ok(())
        }

        #[instrument(skip(self))]
        async fn close(&self) -> NamespaceResult<()> {
            if self.closed.swap(true, Ordering::SeqCst) {
                tracing::debug!(namespace = %self.namespace, err = %NamespaceError::DoubleClose, "namespace manager already closed");
                return Ok(());
            }
            self.pool.close().await;
            Ok(())
        }
    }

    impl PostgresNamespaceManager {
        async fn drop_stale_schemas(&self, other_schemas: Vec<String>) {
            // Best-effort background cleanup: the source's own publish step
            // never actually awaited its schema drops (open
            // question); this implementation awaits every drop concurrently
            // but treats individual failure as non-fatal, since the old
            // namespace being merely inaccessible (views already repointed)
            // is an acceptable outcome even if a DROP SCHEMA itself fails.
            let drops = other_schemas.into_iter().map(|schema_name| {
                let pool = Arc::clone(&self.pool);
                async move {
                    let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema_name} CASCADE"))
                        .execute(&*pool)
                        .await;
                }
            });
            futures_util::future::join_all(drops).await;
        }
    }

    /// Subscribe to the `namespace_published` channel and
    /// invoke `on_publish` with the newly-published namespace's name each
    /// time a publish commits. Runs until the connection drops; callers
    /// typically `tokio::spawn` this to keep a cached "current public
    /// namespace" value warm without querying `ponder_metadata` per read.
    pub async fn listen_for_publish<F>(pool: &PgPool, mut on_publish: F) -> NamespaceResult<()>
    where
        F: FnMut(String) + Send,
    {
        let mut listener = sqlx::postgres::PgListener::connect_with(pool)
            .await
            .map_err(NamespaceError::from)?;
        listener
            .listen("namespace_published")
            .await
            .map_err(NamespaceError::from)?;

        loop {
            let notification = listener.recv().await.map_err(NamespaceError::from)?;
            let payload: serde_json::Value =
                serde_json::from_str(notification.payload()).map_err(|e| NamespaceError::Other {
                    message: format!("malformed namespace_published payload: {e}"),
                })?;
            if let Some(namespace) = payload.get("namespace_version").and_then(|v| v.as_str()) {
                on_publish(namespace.to_string());
            }
        }
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use sqlx::{Row, SqlitePool};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::instrument;

    /// SQLite has no schema/namespace concept, so isolation is approximated
    /// by prefixing table names (`<namespace>__<table>_versioned`) inside
    /// the single database file, and "publish" creates `<table>`/
    /// `<table>_versioned` views over the prefixed tables rather than
    /// dropping/recreating a schema. This is a deliberate simplification of
    /// the single-schema backend; see `DESIGN.md`.
    pub struct SqliteNamespaceManager {
        pool: Arc<SqlitePool>,
        namespace: String,
        prefix: String,
        closed: AtomicBool,
    }

    impl SqliteNamespaceManager {
        #[must_use]
        pub fn new(pool: Arc<SqlitePool>, prefix: &str, tag: u64) -> Self {
            Self {
                pool,
                namespace: format!("{prefix}_{tag}"),
                prefix: prefix.to_string(),
                closed: AtomicBool::new(false),
            }
        }

        fn qualified(&self, table: &str) -> String {
            format!("{}__{}_versioned", self.namespace, table)
        }
    }

    #[async_trait]
    impl NamespaceManager for SqliteNamespaceManager {
        fn namespace(&self) -> &str {
            &self.namespace
        }

        #[instrument(skip(self, schema))]
        async fn reload(&self, schema: &Schema) -> NamespaceResult<()> {
            let mut tx = self.pool.begin().await.map_err(NamespaceError::from)?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS ponder_metadata ( \
                    namespace_version TEXT PRIMARY KEY, \
                    schema TEXT NOT NULL, \
                    is_published INTEGER NOT NULL DEFAULT 0 \
                )",
            )
            .execute(&mut *tx)
            .await
            .map_err(NamespaceError::from)?;

            let schema_json = serde_json::to_string(schema).map_err(|e| NamespaceError::Other {
                message: format!("failed to serialize schema: {e}"),
            })?;
            sqlx::query(
                "INSERT INTO ponder_metadata (namespace_version, schema, is_published) VALUES (?, ?, 0) \
                 ON CONFLICT (namespace_version) DO UPDATE SET schema = excluded.schema",
            )
            .bind(&self.namespace)
            .bind(&schema_json)
            .execute(&mut *tx)
            .await
            .map_err(NamespaceError::from)?;

            for table in &schema.tables {
                let qualified = self.qualified(&table.name);
                sqlx::query(&format!("DROP TABLE IF EXISTS {qualified}"))
                    .execute(&mut *tx)
                    .await
                    .map_err(NamespaceError::from)?;
                let mut ddl = versioned_table_ddl(&qualified, table, Backend::Sqlite);
                for column in &table.columns {
                    if let crate::schema::ColumnType::Enum(name) = &column.ty {
                        if let Some(def) = schema.enum_def(name) {
                            let check = enum_check_clause(&column.name, &def.values);
                            ddl = ddl.trim_end_matches(")").to_string() + &format!(",\n  {check}\n)");
                        }
                    }
                }
                sqlx::query(&ddl).execute(&mut *tx).await.map_err(NamespaceError::from)?;
            }

            tx.commit().await.map_err(NamespaceError::from)?;
            Ok(())
        }

        #[instrument(skip(self))]
        async fn publish(&self) -> NamespaceResult<()> {
            let mut tx = self.pool.begin().await.map_err(NamespaceError::from)?;

            sqlx::query("UPDATE ponder_metadata SET is_published = 1 WHERE namespace_version = ?")
                .bind(&self.namespace)
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;
            sqlx::query("DELETE FROM ponder_metadata WHERE namespace_version <> ?")
                .bind(&self.namespace)
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;

            let schema_row = sqlx::query("SELECT schema FROM ponder_metadata WHERE namespace_version = ?")
                .bind(&self.namespace)
                .fetch_optional(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;
            let Some(schema_row) = schema_row else {
                return Err(NamespaceError::Corruption {
                    message: format!("no ponder_metadata row for namespace {}", self.namespace),
                });
            };
            let schema_json: String = schema_row.get("schema");
            let schema: Schema = serde_json::from_str(&schema_json).map_err(|e| NamespaceError::Other {
                message: format!("failed to deserialize stored schema: {e}"),
            })?;

            for table in &schema.tables {
                sqlx::query(&format!("DROP VIEW IF EXISTS {}_versioned", table.name))
                    .execute(&mut *tx)
                    .await
                    .map_err(NamespaceError::from)?;
                sqlx::query(&format!("DROP VIEW IF EXISTS {}", table.name))
                    .execute(&mut *tx)
                    .await
                    .map_err(NamespaceError::from)?;
                sqlx::query(&format!(
                    "CREATE VIEW {0}_versioned AS SELECT * FROM {1}",
                    table.name,
                    self.qualified(&table.name)
                ))
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;
                sqlx::query(&format!(
                    "CREATE VIEW {0} AS SELECT * FROM {1} WHERE {2} = 'latest'",
                    table.name,
                    self.qualified(&table.name),
                    EFFECTIVE_TO
                ))
                .execute(&mut *tx)
                .await
                .map_err(NamespaceError::from)?;
            }

            tx.commit().await.map_err(NamespaceError::from)?;

            // Best-effort: drop tables belonging to older namespaces sharing
            // this prefix now that their views have been repointed.
            let rows = sqlx::query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ? AND name NOT LIKE ?",
            )
            .bind(format!("{}_%", self.prefix))
            .bind(format!("{}__%", self.namespace))
            .fetch_all(&*self.pool)
            .await
            .unwrap_or_default();
            for row in rows {
                let name: String = row.get("name");
                let _ = sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
                    .execute(&*self.pool)
                    .await;
            }

            Ok(())
        }

        #[instrument(skip(self))]
        async fn close(&self) -> NamespaceResult<()> {
            if self.closed.swap(true, Ordering::SeqCst) {
                tracing::debug!(namespace = %self.namespace, err = %NamespaceError::DoubleClose, "namespace manager already closed");
                return Ok(());
            }
            self.pool.close().await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};

    #[test]
    fn versioned_table_ddl_includes_bitemporal_columns_and_pk() {
        let table = Table {
            name: "Token".to_string(),
            id_column: "id".to_string(),
            columns: vec![
                Column::new("id", ColumnType::String),
                Column::new("supply", ColumnType::BigInt),
            ],
        };
        let ddl = versioned_table_ddl("ponder_1.Token_versioned", &table, Backend::Sqlite);
        assert!(ddl.contains("ponder_1.Token_versioned"));
        assert!(ddl.contains(EFFECTIVE_FROM));
        assert!(ddl.contains(EFFECTIVE_TO));
        assert!(ddl.contains(&format!("PRIMARY KEY (id, {EFFECTIVE_TO})")));
    }

    #[test]
    fn enum_check_clause_quotes_each_value() {
        let clause = enum_check_clause("status", &["Active".to_string(), "Paused".to_string()]);
        assert_eq!(clause, "CHECK (status IN ('Active', 'Paused'))");
    }
}
