use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Result, Row, StoreError, Version, Versioned};

/// A single conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Creates a row; fails with `AlreadyExists` if the key is taken.
    Insert {
        table: String,
        key: String,
        data: serde_json::Value,
    },

    /// Replaces a row if it is still at `expected`.
    Update {
        table: String,
        key: String,
        expected: Version,
        data: serde_json::Value,
    },

    /// Deletes a row if it is still at `expected`.
    Delete {
        table: String,
        key: String,
        expected: Version,
    },
}

impl WriteOp {
    /// Builds an insert from a serializable value.
    pub fn insert<T: Serialize>(table: &str, key: impl Into<String>, value: &T) -> Result<Self> {
        Ok(WriteOp::Insert {
            table: table.to_string(),
            key: key.into(),
            data: serde_json::to_value(value)?,
        })
    }

    /// Builds a conditional update from a serializable value.
    pub fn update<T: Serialize>(
        table: &str,
        key: impl Into<String>,
        expected: Version,
        value: &T,
    ) -> Result<Self> {
        Ok(WriteOp::Update {
            table: table.to_string(),
            key: key.into(),
            expected,
            data: serde_json::to_value(value)?,
        })
    }

    /// Builds a conditional delete.
    pub fn delete(table: &str, key: impl Into<String>, expected: Version) -> Self {
        WriteOp::Delete {
            table: table.to_string(),
            key: key.into(),
            expected,
        }
    }

    /// Returns the table this write targets.
    pub fn table(&self) -> &str {
        match self {
            WriteOp::Insert { table, .. }
            | WriteOp::Update { table, .. }
            | WriteOp::Delete { table, .. } => table,
        }
    }

    /// Returns the key this write targets.
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Insert { key, .. } | WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => {
                key
            }
        }
    }
}

/// Core trait for row store implementations.
///
/// Every write is conditional on the state the caller last observed, which
/// is what lets higher layers implement single-writer transitions with a
/// read / decide / compare-and-swap loop. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Reads a single row.
    async fn get(&self, table: &str, key: &str) -> Result<Option<Row>>;

    /// Reads every row of a table, ordered by key.
    async fn scan(&self, table: &str) -> Result<Vec<Row>>;

    /// Applies a single conditional write and returns the row's new version.
    ///
    /// Deletes return the version the row had when it was removed.
    async fn apply(&self, op: WriteOp) -> Result<Version>;

    /// Applies a small set of conditional writes atomically.
    ///
    /// Either every write succeeds or none is visible. Returns the resulting
    /// versions in the order the writes were given.
    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<Version>>;
}

/// Extension trait providing convenience methods for row stores.
#[async_trait]
pub trait RowStoreExt: RowStore {
    /// Inserts a new row.
    async fn insert(&self, table: &str, key: &str, data: serde_json::Value) -> Result<Version> {
        self.apply(WriteOp::Insert {
            table: table.to_string(),
            key: key.to_string(),
            data,
        })
        .await
    }

    /// Replaces a row if its current version equals `expected`.
    async fn compare_and_swap(
        &self,
        table: &str,
        key: &str,
        expected: Version,
        data: serde_json::Value,
    ) -> Result<Version> {
        self.apply(WriteOp::Update {
            table: table.to_string(),
            key: key.to_string(),
            expected,
            data,
        })
        .await
    }

    /// Deletes a row if its current version equals `expected`.
    async fn delete(&self, table: &str, key: &str, expected: Version) -> Result<()> {
        self.apply(WriteOp::delete(table, key, expected)).await?;
        Ok(())
    }

    /// Reads and decodes a single row.
    async fn load<T>(&self, table: &str, key: &str) -> Result<Option<Versioned<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match self.get(table, key).await? {
            Some(row) => Ok(Some(row.decode()?)),
            None => Ok(None),
        }
    }

    /// Reads and decodes every row of a table.
    async fn load_all<T>(&self, table: &str) -> Result<Vec<Versioned<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.scan(table)
            .await?
            .iter()
            .map(|row| row.decode())
            .collect()
    }

    /// Checks whether a row exists.
    async fn exists(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self.get(table, key).await?.is_some())
    }
}

// Blanket implementation for all RowStore implementations
impl<T: RowStore + ?Sized> RowStoreExt for T {}

/// Validates a batch of writes before any of them is attempted.
///
/// A transaction must be non-empty and may touch each row at most once.
pub fn validate_transaction(ops: &[WriteOp]) -> Result<()> {
    if ops.is_empty() {
        return Err(StoreError::InvalidTransaction(
            "cannot apply an empty transaction".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(ops.len());
    for op in ops {
        if !seen.insert((op.table(), op.key())) {
            return Err(StoreError::InvalidTransaction(format!(
                "row {}/{} written more than once",
                op.table(),
                op.key()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_capture_target() {
        let op = WriteOp::insert("stock", "SKU-1", &serde_json::json!({ "available": 3 })).unwrap();
        assert_eq!(op.table(), "stock");
        assert_eq!(op.key(), "SKU-1");

        let op = WriteOp::delete("carts", "c1", Version::first());
        assert_eq!(op.table(), "carts");
        assert_eq!(op.key(), "c1");
    }

    #[test]
    fn test_empty_transaction_is_rejected() {
        assert!(matches!(
            validate_transaction(&[]),
            Err(StoreError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_duplicate_row_in_transaction_is_rejected() {
        let ops = vec![
            WriteOp::delete("orders", "o1", Version::first()),
            WriteOp::delete("orders", "o1", Version::new(2)),
        ];
        assert!(matches!(
            validate_transaction(&ops),
            Err(StoreError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_same_key_in_different_tables_is_allowed() {
        let ops = vec![
            WriteOp::delete("orders", "k", Version::first()),
            WriteOp::delete("reservations", "k", Version::first()),
        ];
        assert!(validate_transaction(&ops).is_ok());
    }
}
