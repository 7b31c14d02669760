//! Postgres-backed `IndexingStore`.
//!
//! One pool, embedded migrations run once on connect, every write wrapped
//! in a transaction. Because table shape is a runtime `Schema` value rather
//! than a compile-time type, writes build dynamic SQL text (quoting values
//! through [`super::serialize`]) instead of `sqlx::query!`'s checked
//! macros.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::checkpoint::{Checkpoint, CheckpointBound};
use crate::config::PoolOptions;
use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnType, Schema, EFFECTIVE_FROM, EFFECTIVE_TO};
use crate::store::query::{FindManyArgs, Op, Page};
use crate::store::serialize::{json_to_scalar_list, quote, scalar_to_sql};
use crate::store::value::{Row as EntityRow, Scalar};
use crate::store::{cursor_to_scalar, record_method_duration, revert, IndexingStore, RowWrite, WriteMode};
use std::time::Instant;

pub struct PostgresIndexingStore {
    pool: Arc<PgPool>,
    schema: Schema,
}

impl PostgresIndexingStore {
    #[instrument(skip(database_url, schema, pool))]
    pub async fn connect(
        database_url: &str,
        pool: PoolOptions,
        schema: Schema,
    ) -> StoreResult<Self> {
        schema.validate()?;
        let pg_pool = PgPoolOptions::new()
            .max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .acquire_timeout(pool.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("connect error: {e}"),
            })?;

        #[cfg(feature = "postgres-migrations")]
        sqlx::migrate!("./migrations/postgres")
            .run(&pg_pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("migration failure: {e}"),
            })?;

        for table in &schema.tables {
            let mut ddl = crate::store::namespace::versioned_table_ddl(&table.name, table, crate::config::Backend::Postgres);
            for column in &table.columns {
                if let ColumnType::Enum(name) = &column.ty {
                    if let Some(def) = schema.enum_def(name) {
                        let check = crate::store::namespace::enum_check_clause(&column.name, &def.values);
                        ddl = ddl.trim_end_matches(')').to_string() + &format!(",\n  {check}\n)");
                    }
                }
            }
            sqlx::query(&ddl.replacen("CREATE TABLE", "CREATE TABLE IF NOT EXISTS", 1))
                .execute(&pg_pool)
                .await
                .map_err(|e| StoreError::Backend {
                    message: format!("table creation failure for {}: {e}", table.name),
                })?;
        }

        Ok(Self {
            pool: Arc::new(pg_pool),
            schema,
        })
    }

    fn table_def(&self, table: &str) -> StoreResult<&crate::schema::Table> {
        self.schema.table(table).ok_or_else(|| StoreError::Other {
            message: format!("unknown table {table}"),
        })
    }

    fn row_to_insert_sql(
        &self,
        table: &str,
        id: &Scalar,
        row: &EntityRow,
        effective_from: &Checkpoint,
        effective_to: &CheckpointBound,
    ) -> StoreResult<String> {
        let def = self.table_def(table)?;
        let mut columns = vec![def.id_column.clone(), EFFECTIVE_FROM.to_string(), EFFECTIVE_TO.to_string()];
        let mut values = vec![
            scalar_to_sql(table, def.id(), id)?,
            quote(&effective_from.encode()),
            quote(&effective_to.encode()),
        ];
        for column in &def.columns {
            if column.name == def.id_column {
                continue;
            }
            let value = row.get(&column.name).cloned().unwrap_or(Scalar::Null);
            columns.push(column.name.clone());
            values.push(scalar_to_sql(table, column, &value)?);
        }
        Ok(format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            values.join(", ")
        ))
    }

    async fn current_version(
        &self,
        table: &str,
        id: &Scalar,
    ) -> StoreResult<Option<(Checkpoint, EntityRow)>> {
        self.version_at(table, id, CheckpointBound::Latest).await
    }

    /// Fetch the version of `id` valid as of `at`.
    async fn version_at(
        &self,
        table: &str,
        id: &Scalar,
        at: CheckpointBound,
    ) -> StoreResult<Option<(Checkpoint, EntityRow)>> {
        let def = self.table_def(table)?;
        let id_sql = scalar_to_sql(table, def.id(), id)?;
        let sql = match at {
            CheckpointBound::Latest => format!(
                "SELECT * FROM {table} WHERE {} = {id_sql} AND {EFFECTIVE_TO} = 'latest'",
                def.id_column
            ),
            CheckpointBound::At(cp) => {
                let encoded = quote(&cp.encode());
                format!(
                    "SELECT * FROM {table} WHERE {} = {id_sql} AND {EFFECTIVE_FROM} <= {encoded} \
                     AND ({EFFECTIVE_TO} > {encoded} OR {EFFECTIVE_TO} = 'latest')",
                    def.id_column
                )
            }
        };
        let row = sqlx::query(&sql)
            .fetch_optional(&*self.pool)
            .await
            .map_err(StoreError::from)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let effective_from: String = row.try_get(EFFECTIVE_FROM).map_err(StoreError::from)?;
                let cp = Checkpoint::decode(&effective_from)?;
                Ok(Some((cp, self.decode_row(table, &row)?)))
            }
        }
    }

    fn decode_row(&self, table: &str, row: &sqlx::postgres::PgRow) -> StoreResult<EntityRow> {
        let def = self.table_def(table)?;
        let mut out = EntityRow::new();
        for column in &def.columns {
            let scalar = decode_column(row, column)?;
            out.insert(column.name.clone(), scalar);
        }
        Ok(out)
    }

    async fn close_current(&self, table: &str, id: &Scalar, at: &Checkpoint) -> StoreResult<()> {
        let def = self.table_def(table)?;
        let id_sql = scalar_to_sql(table, def.id(), id)?;
        let sql = format!(
            "UPDATE {table} SET {EFFECTIVE_TO} = {} WHERE {} = {id_sql} AND {EFFECTIVE_TO} = 'latest'",
            quote(&at.encode()),
            def.id_column
        );
        sqlx::query(&sql).execute(&*self.pool).await.map_err(StoreError::from)?;
        Ok(())
    }

    async fn write_one(
        &self,
        table: &str,
        id: Scalar,
        row: EntityRow,
        checkpoint: Checkpoint,
        mode: WriteMode,
    ) -> StoreResult<()> {
        // Read the current version on its own connection before opening the
        // write transaction: holding the transaction's connection open while
        // requesting a second one for this read would starve a
        // single-connection pool.
        let current = self.current_version(table, &id).await?;
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        match current {
            None => {
                if mode == WriteMode::Update {
                    return Err(StoreError::NotFound {
                        table: table.to_string(),
                        id: format!("{id:?}"),
                    });
                }
                let sql = self.row_to_insert_sql(
                    table,
                    &id,
                    &row,
                    &checkpoint,
                    &CheckpointBound::Latest,
                )?;
                sqlx::query(&sql).execute(&mut *tx).await.map_err(StoreError::from)?;
            }
            Some((current_from, current_row)) => {
                if mode == WriteMode::Create {
                    return Err(StoreError::AlreadyExists {
                        table: table.to_string(),
                        id: format!("{id:?}"),
                    });
                }

                if checkpoint < current_from {
                    return Err(StoreError::PastWrite {
                        table: table.to_string(),
                        id: format!("{id:?}"),
                        attempted: checkpoint.encode(),
                        current: current_from.encode(),
                    });
                }

                let merged = {
                    let mut m = current_row.clone();
                    m.extend(row);
                    m
                };

                if checkpoint == current_from {
                    // Squash: same checkpoint, overwrite in place.
                    let def = self.table_def(table)?;
                    let id_sql = scalar_to_sql(table, def.id(), &id)?;
                    let mut assignments = Vec::new();
                    for column in &def.columns {
                        if column.name == def.id_column {
                            continue;
                        }
                        let value = merged.get(&column.name).cloned().unwrap_or(Scalar::Null);
                        assignments.push(format!(
                            "{} = {}",
                            column.name,
                            scalar_to_sql(table, column, &value)?
                        ));
                    }
                    let sql = format!(
                        "UPDATE {table} SET {} WHERE {} = {id_sql} AND {EFFECTIVE_TO} = 'latest'",
                        assignments.join(", "),
                        def.id_column
                    );
                    sqlx::query(&sql).execute(&mut *tx).await.map_err(StoreError::from)?;
                } else {
                    // Branch: close the current version, insert a new one.
                    let def = self.table_def(table)?;
                    let id_sql = scalar_to_sql(table, def.id(), &id)?;
                    let close_sql = format!(
                        "UPDATE {table} SET {EFFECTIVE_TO} = {} WHERE {} = {id_sql} AND {EFFECTIVE_TO} = 'latest'",
                        quote(&checkpoint.encode()),
                        def.id_column
                    );
                    sqlx::query(&close_sql).execute(&mut *tx).await.map_err(StoreError::from)?;

                    let insert_sql = self.row_to_insert_sql(
                        table,
                        &id,
                        &merged,
                        &checkpoint,
                        &CheckpointBound::Latest,
                    )?;
                    sqlx::query(&insert_sql).execute(&mut *tx).await.map_err(StoreError::from)?;
                }
            }
        }

        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }
}

fn decode_column(row: &sqlx::postgres::PgRow, column: &crate::schema::Column) -> StoreResult<Scalar> {
    let name = column.name.as_str();
    if name == EFFECTIVE_FROM || name == EFFECTIVE_TO {
        let s: String = row.try_get(name).map_err(StoreError::from)?;
        return Ok(Scalar::Str(s));
    }

    macro_rules! get_or_null {
        ($t:ty) => {
            if column.optional {
                row.try_get::<Option<$t>, _>(name).map_err(StoreError::from)?
            } else {
                Some(row.try_get::<$t, _>(name).map_err(StoreError::from)?)
            }
        };
    }

    Ok(match &column.ty {
        ColumnType::Boolean => match get_or_null!(i32) {
            Some(v) => Scalar::Bool(v != 0),
            None => Scalar::Null,
        },
        ColumnType::Int => match get_or_null!(i64) {
            Some(v) => Scalar::Int(v),
            None => Scalar::Null,
        },
        ColumnType::Float => match get_or_null!(String) {
            Some(s) => Scalar::Float(s.parse().unwrap_or_default()),
            None => Scalar::Null,
        },
        ColumnType::String | ColumnType::Enum(_) | ColumnType::Reference(_) => {
            match get_or_null!(String) {
                Some(s) => Scalar::Str(s),
                None => Scalar::Null,
            }
        }
        ColumnType::BigInt => match get_or_null!(String) {
            Some(s) => Scalar::BigInt(s),
            None => Scalar::Null,
        },
        ColumnType::Bytes => match get_or_null!(String) {
            Some(s) => Scalar::Bytes(s),
            None => Scalar::Null,
        },
        ColumnType::List(inner) => match get_or_null!(String) {
            Some(text) => json_to_scalar_list(inner, &text)?,
            None => Scalar::Null,
        },
    })
}

#[async_trait]
impl IndexingStore for PostgresIndexingStore {
    #[instrument(skip(self, row), err)]
    async fn create(
        &self,
        table: &str,
        id: Scalar,
        row: EntityRow,
        checkpoint: Checkpoint,
    ) -> StoreResult<()> {
        let start = Instant::now();
        let result = self.write_one(table, id, row, checkpoint, WriteMode::Create).await;
        record_method_duration("postgres", "create", table, start.elapsed());
        result
    }

    #[instrument(skip(self, rows), err)]
    async fn create_many(
        &self,
        table: &str,
        rows: Vec<RowWrite>,
        checkpoint: Checkpoint,
    ) -> StoreResult<()> {
        let start = Instant::now();
        for chunk in rows.chunks(1000) {
            let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
            for item in chunk {
                let sql = self.row_to_insert_sql(
                    table,
                    &item.id,
                    &item.row,
                    &checkpoint,
                    &CheckpointBound::Latest,
                )?;
                sqlx::query(&sql).execute(&mut *tx).await.map_err(StoreError::from)?;
            }
            tx.commit().await.map_err(StoreError::from)?;
        }
        record_method_duration("postgres", "create_many", table, start.elapsed());
        Ok(())
    }

    #[instrument(skip(self, patch), err)]
    async fn update(
        &self,
        table: &str,
        id: Scalar,
        patch: EntityRow,
        checkpoint: Checkpoint,
    ) -> StoreResult<()> {
        let start = Instant::now();
        let result = self.write_one(table, id, patch, checkpoint, WriteMode::Update).await;
        record_method_duration("postgres", "update", table, start.elapsed());
        result
    }

    #[instrument(skip(self, patches), err)]
    async fn update_many(
        &self,
        table: &str,
        patches: Vec<RowWrite>,
        checkpoint: Checkpoint,
    ) -> StoreResult<()> {
        let start = Instant::now();
        for chunk in patches.chunks(1000) {
            for item in chunk {
                self.write_one(table, item.id.clone(), item.row.clone(), checkpoint, WriteMode::Update)
                    .await?;
            }
        }
        record_method_duration("postgres", "update_many", table, start.elapsed());
        Ok(())
    }

    #[instrument(skip(self, row), err)]
    async fn upsert(
        &self,
        table: &str,
        id: Scalar,
        row: EntityRow,
        checkpoint: Checkpoint,
    ) -> StoreResult<()> {
        let start = Instant::now();
        let result = self.write_one(table, id, row, checkpoint, WriteMode::Upsert).await;
        record_method_duration("postgres", "upsert", table, start.elapsed());
        result
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, table: &str, id: Scalar, checkpoint: Checkpoint) -> StoreResult<()> {
        let start = Instant::now();
        let Some((current_from, _)) = self.current_version(table, &id).await? else {
            return Err(StoreError::NotFound {
                table: table.to_string(),
                id: format!("{id:?}"),
            });
        };

        if checkpoint == current_from {
            let def = self.table_def(table)?;
            let id_sql = scalar_to_sql(table, def.id(), &id)?;
            let sql = format!(
                "DELETE FROM {table} WHERE {} = {id_sql} AND {EFFECTIVE_TO} = 'latest'",
                def.id_column
            );
            sqlx::query(&sql).execute(&*self.pool).await.map_err(StoreError::from)?;
        } else {
            self.close_current(table, &id, &checkpoint).await?;
        }
        record_method_duration("postgres", "delete", table, start.elapsed());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_unique(&self, table: &str, id: &Scalar, at: CheckpointBound) -> StoreResult<Option<EntityRow>> {
        let start = Instant::now();
        let result = self.version_at(table, id, at).await?.map(|(_, row)| row);
        record_method_duration("postgres", "find_unique", table, start.elapsed());
        Ok(result)
    }

    #[instrument(skip(self, args))]
    async fn find_many(&self, table: &str, args: FindManyArgs, at: CheckpointBound) -> StoreResult<Page<EntityRow>> {
        let start = Instant::now();
        let def = self.table_def(table)?;
        let limit = args.validate(1000)?;

        let mut conditions = match at {
            CheckpointBound::Latest => vec![format!("{EFFECTIVE_TO} = 'latest'")],
            CheckpointBound::At(cp) => {
                let encoded = quote(&cp.encode());
                vec![format!(
                    "{EFFECTIVE_FROM} <= {encoded} AND ({EFFECTIVE_TO} > {encoded} OR {EFFECTIVE_TO} = 'latest')"
                )]
            }
        };
        for filter in &args.filters {
            let column = def.column(&filter.column).ok_or_else(|| StoreError::InvalidQuery {
                message: format!("unknown column {}", filter.column),
            })?;
            let op_sql = match filter.op {
                Op::Eq => "=",
                Op::Ne => "<>",
                Op::Lt => "<",
                Op::Lte => "<=",
                Op::Gt => ">",
                Op::Gte => ">=",
                Op::In => "= ANY",
            };
            let value_sql = match &filter.value {
                crate::store::query::FilterValue::Scalar(s) => scalar_to_sql(table, column, s)?,
                crate::store::query::FilterValue::List(items) => {
                    let rendered: Vec<String> = items
                        .iter()
                        .map(|s| scalar_to_sql(table, column, s))
                        .collect::<Result<_, _>>()?;
                    format!("(ARRAY[{}])", rendered.join(", "))
                }
            };
            conditions.push(format!("{} {op_sql} {value_sql}", filter.column));
        }
        if let Some(cursor) = &args.cursor {
            let cursor_scalar = cursor_to_scalar(def.id(), cursor);
            conditions.push(format!(
                "{} > {}",
                def.id_column,
                scalar_to_sql(table, def.id(), &cursor_scalar)?
            ));
        }

        let order_clause = if args.order_by.is_empty() {
            format!("ORDER BY {} ASC", def.id_column)
        } else {
            let parts: Vec<String> = args
                .order_by
                .iter()
                .map(|o| format!("{} {} {}", o.column, o.sql_direction(), o.nulls_clause()))
                .collect();
            format!("ORDER BY {}", parts.join(", "))
        };

        let sql = format!(
            "SELECT * FROM {table} WHERE {} {order_clause} LIMIT {}",
            conditions.join(" AND "),
            limit + 1
        );

        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(StoreError::from)?;

        let mut items: Vec<EntityRow> = rows
            .iter()
            .map(|r| self.decode_row(table, r))
            .collect::<Result<_, _>>()?;

        let next_cursor = if items.len() as u32 > limit {
            items.truncate(limit as usize);
            items.last().and_then(|r| r.get(&def.id_column)).and_then(crate::store::value::Scalar::as_cursor)
        } else {
            None
        };

        record_method_duration("postgres", "find_many", table, start.elapsed());
        Ok(Page { items, next_cursor })
    }

    #[instrument(skip(self), err)]
    async fn revert(&self, table: &str, safe_checkpoint: Checkpoint) -> StoreResult<()> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        sqlx::query(&revert::delete_versions_from_sql(table, &safe_checkpoint))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        sqlx::query(&revert::reopen_versions_sql(table, &safe_checkpoint))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;
        record_method_duration("postgres", "revert", table, start.elapsed());
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_versions(&self, table: &str, id: &Scalar) -> StoreResult<Vec<crate::store::value::VersionedRow>> {
        let start = Instant::now();
        let def = self.table_def(table)?;
        let id_sql = scalar_to_sql(table, def.id(), id)?;
        let sql = format!(
            "SELECT * FROM {table} WHERE {} = {id_sql} ORDER BY {EFFECTIVE_FROM} ASC",
            def.id_column
        );
        let rows = sqlx::query(&sql).fetch_all(&*self.pool).await.map_err(StoreError::from)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let effective_from: String = row.try_get(EFFECTIVE_FROM).map_err(StoreError::from)?;
            let effective_to: String = row.try_get(EFFECTIVE_TO).map_err(StoreError::from)?;
            out.push(crate::store::value::VersionedRow {
                id: id.clone(),
                row: self.decode_row(table, row)?,
                effective_from: Checkpoint::decode(&effective_from)?,
                effective_to: CheckpointBound::decode(&effective_to)?,
            });
        }

        record_method_duration("postgres", "list_versions", table, start.elapsed());
        Ok(out)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
