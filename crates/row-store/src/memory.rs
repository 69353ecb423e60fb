use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    Result, Row, StoreError, Version,
    store::{RowStore, WriteOp, validate_transaction},
};

#[derive(Debug, Clone)]
struct StoredRow {
    version: Version,
    data: serde_json::Value,
    updated_at: DateTime<Utc>,
}

type Tables = HashMap<String, BTreeMap<String, StoredRow>>;

/// In-memory row store implementation.
///
/// Provides the same conditional-write semantics as the PostgreSQL
/// implementation. Every operation runs under one short critical section
/// and never awaits while holding it.
#[derive(Clone, Default)]
pub struct InMemoryRowStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryRowStore {
    /// Creates a new empty in-memory row store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows stored in a table.
    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Removes every row from every table.
    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }

    /// Reads several tables under one lock, so the result reflects a single
    /// point in time across all of them.
    pub async fn snapshot(&self, names: &[&str]) -> Vec<Vec<Row>> {
        let tables = self.tables.read().await;
        names
            .iter()
            .map(|table| {
                tables
                    .get(*table)
                    .map(|rows| {
                        rows.iter()
                            .map(|(key, stored)| to_row(table, key, stored))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect()
    }
}

fn current_version(tables: &Tables, table: &str, key: &str) -> Option<Version> {
    tables
        .get(table)
        .and_then(|rows| rows.get(key))
        .map(|row| row.version)
}

/// Checks that a write would succeed against the current state.
fn check(tables: &Tables, op: &WriteOp) -> Result<()> {
    let current = current_version(tables, op.table(), op.key());

    match (op, current) {
        (WriteOp::Insert { .. }, None) => Ok(()),
        (WriteOp::Insert { table, key, .. }, Some(_)) => Err(StoreError::AlreadyExists {
            table: table.clone(),
            key: key.clone(),
        }),
        (
            WriteOp::Update {
                table,
                key,
                expected,
                ..
            }
            | WriteOp::Delete {
                table,
                key,
                expected,
            },
            current,
        ) => match current {
            None => Err(StoreError::NotFound {
                table: table.clone(),
                key: key.clone(),
            }),
            Some(actual) if actual != *expected => Err(StoreError::ConcurrencyConflict {
                table: table.clone(),
                key: key.clone(),
                expected: *expected,
                actual,
            }),
            Some(_) => Ok(()),
        },
    }
}

/// Applies a write that has already passed [`check`].
fn write(tables: &mut Tables, op: WriteOp, now: DateTime<Utc>) -> Version {
    match op {
        WriteOp::Insert { table, key, data } => {
            tables.entry(table).or_default().insert(
                key,
                StoredRow {
                    version: Version::first(),
                    data,
                    updated_at: now,
                },
            );
            Version::first()
        }
        WriteOp::Update {
            table,
            key,
            expected,
            data,
        } => {
            let version = expected.next();
            tables.entry(table).or_default().insert(
                key,
                StoredRow {
                    version,
                    data,
                    updated_at: now,
                },
            );
            version
        }
        WriteOp::Delete {
            table,
            key,
            expected,
        } => {
            if let Some(rows) = tables.get_mut(&table) {
                rows.remove(&key);
            }
            expected
        }
    }
}

fn to_row(table: &str, key: &str, stored: &StoredRow) -> Row {
    Row {
        table: table.to_string(),
        key: key.to_string(),
        version: stored.version,
        data: stored.data.clone(),
        updated_at: stored.updated_at,
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Row>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .map(|stored| to_row(table, key, stored)))
    }

    async fn scan(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(key, stored)| to_row(table, key, stored))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply(&self, op: WriteOp) -> Result<Version> {
        let mut tables = self.tables.write().await;
        if let Err(e) = check(&tables, &op) {
            if e.is_write_conflict() {
                metrics::counter!("row_store_conflicts_total").increment(1);
            }
            return Err(e);
        }
        Ok(write(&mut tables, op, Utc::now()))
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Version>> {
        validate_transaction(&ops)?;

        let mut tables = self.tables.write().await;

        // Validate every write before applying any of them
        for op in &ops {
            check(&tables, op)?;
        }

        let now = Utc::now();
        let versions = ops
            .into_iter()
            .map(|op| write(&mut tables, op, now))
            .collect();

        tracing::trace!("transaction committed");
        Ok(versions)
    }
}
