use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row as _, postgres::PgRow};

use crate::{
    Result, Row, StoreError, Version,
    store::{RowStore, WriteOp, validate_transaction},
};

/// PostgreSQL-backed row store implementation.
///
/// Rows live in a single `rows` table keyed by `(table_name, row_key)`.
/// Conditional writes are expressed as `WHERE version = $expected` clauses so
/// the database itself arbitrates between concurrent writers.
#[derive(Clone)]
pub struct PostgresRowStore {
    pool: PgPool,
}

impl PostgresRowStore {
    /// Creates a new PostgreSQL row store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_from_pg(row: PgRow) -> Result<Row> {
        Ok(Row {
            table: row.try_get("table_name")?,
            key: row.try_get("row_key")?,
            version: Version::new(row.try_get("version")?),
            data: row.try_get("data")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

async fn current_version(conn: &mut PgConnection, table: &str, key: &str) -> Result<Option<Version>> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM rows WHERE table_name = $1 AND row_key = $2")
            .bind(table)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(version.map(Version::new))
}

/// Explains why a conditional update or delete matched no row.
async fn missed_write(
    conn: &mut PgConnection,
    table: &str,
    key: &str,
    expected: Version,
) -> StoreError {
    match current_version(conn, table, key).await {
        Ok(Some(actual)) => StoreError::ConcurrencyConflict {
            table: table.to_string(),
            key: key.to_string(),
            expected,
            actual,
        },
        Ok(None) => StoreError::NotFound {
            table: table.to_string(),
            key: key.to_string(),
        },
        Err(e) => e,
    }
}

async fn write(conn: &mut PgConnection, op: &WriteOp) -> Result<Version> {
    match op {
        WriteOp::Insert { table, key, data } => {
            let result = sqlx::query(
                r#"
                INSERT INTO rows (table_name, row_key, version, data, updated_at)
                VALUES ($1, $2, 1, $3, now())
                ON CONFLICT (table_name, row_key) DO NOTHING
                "#,
            )
            .bind(table)
            .bind(key)
            .bind(data)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::AlreadyExists {
                    table: table.clone(),
                    key: key.clone(),
                });
            }
            Ok(Version::first())
        }
        WriteOp::Update {
            table,
            key,
            expected,
            data,
        } => {
            let version: Option<i64> = sqlx::query_scalar(
                r#"
                UPDATE rows
                SET version = version + 1, data = $4, updated_at = now()
                WHERE table_name = $1 AND row_key = $2 AND version = $3
                RETURNING version
                "#,
            )
            .bind(table)
            .bind(key)
            .bind(expected.as_i64())
            .bind(data)
            .fetch_optional(&mut *conn)
            .await?;

            match version {
                Some(v) => Ok(Version::new(v)),
                None => Err(missed_write(conn, table, key, *expected).await),
            }
        }
        WriteOp::Delete {
            table,
            key,
            expected,
        } => {
            let result = sqlx::query(
                "DELETE FROM rows WHERE table_name = $1 AND row_key = $2 AND version = $3",
            )
            .bind(table)
            .bind(key)
            .bind(expected.as_i64())
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(missed_write(conn, table, key, *expected).await);
            }
            Ok(*expected)
        }
    }
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Row>> {
        let row = sqlx::query(
            r#"
            SELECT table_name, row_key, version, data, updated_at
            FROM rows
            WHERE table_name = $1 AND row_key = $2
            "#,
        )
        .bind(table)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_from_pg).transpose()
    }

    async fn scan(&self, table: &str) -> Result<Vec<Row>> {
        let rows = sqlx::query(
            r#"
            SELECT table_name, row_key, version, data, updated_at
            FROM rows
            WHERE table_name = $1
            ORDER BY row_key ASC
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_from_pg).collect()
    }

    async fn apply(&self, op: WriteOp) -> Result<Version> {
        let mut conn = self.pool.acquire().await?;
        let result = write(&mut conn, &op).await;
        if let Err(ref e) = result
            && e.is_write_conflict()
        {
            metrics::counter!("row_store_conflicts_total").increment(1);
        }
        result
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Version>> {
        validate_transaction(&ops)?;

        let mut tx = self.pool.begin().await?;
        let mut versions = Vec::with_capacity(ops.len());
        for op in &ops {
            // Dropping `tx` on error rolls back every earlier write
            versions.push(write(&mut tx, op).await?);
        }
        tx.commit().await?;

        tracing::trace!(writes = versions.len(), "transaction committed");
        Ok(versions)
    }
}
