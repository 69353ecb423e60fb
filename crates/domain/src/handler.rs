//! Optimistic read / decide / write loop over a single row.

use std::marker::PhantomData;

use row_store::{RowStore, RowStoreExt, Version, Versioned, WriteOp};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::DomainError;

/// How many times a write is retried after losing a compare-and-swap.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// What a decide step wants done with the row it was shown.
#[derive(Debug)]
pub enum Decision<T, R> {
    /// Store `T` (insert if the row is missing, otherwise replace) and return `R`.
    Write(T, R),
    /// Remove the row, if any, and return `R`.
    Delete(R),
    /// Leave the row alone and return `R`.
    Keep(R),
}

/// Typed access to one table of a [`RowStore`].
///
/// [`RowHandler::execute`] is the only way domain code mutates a row: it
/// reads the current value, asks a pure decide function what to do, and
/// writes the outcome conditionally on the version it read. A lost race
/// re-runs the whole cycle against fresh state, so a decision is never
/// applied to data it did not see.
pub struct RowHandler<S, T> {
    store: S,
    table: &'static str,
    max_attempts: u32,
    _phantom: PhantomData<fn() -> T>,
}

impl<S: Clone, T> Clone for RowHandler<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            table: self.table,
            max_attempts: self.max_attempts,
            _phantom: PhantomData,
        }
    }
}

impl<S, T> RowHandler<S, T>
where
    S: RowStore,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: S, table: &'static str) -> Self {
        Self {
            store,
            table,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            _phantom: PhantomData,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn load(&self, key: &str) -> Result<Option<Versioned<T>>, DomainError> {
        Ok(self.store.load(self.table, key).await?)
    }

    pub async fn load_all(&self) -> Result<Vec<Versioned<T>>, DomainError> {
        Ok(self.store.load_all(self.table).await?)
    }

    /// Builds an insert for this table, for use inside a multi-row transaction.
    pub fn insert_op(&self, key: &str, value: &T) -> Result<WriteOp, DomainError> {
        Ok(WriteOp::insert(self.table, key, value)?)
    }

    /// Builds a conditional update against the version the row was read at.
    pub fn update_op(
        &self,
        key: &str,
        expected: Version,
        value: &T,
    ) -> Result<WriteOp, DomainError> {
        Ok(WriteOp::update(self.table, key, expected, value)?)
    }

    /// Runs `decide` against the current row and applies its decision.
    ///
    /// `decide` may run several times and must not have side effects.
    pub async fn execute<R, F>(&self, key: &str, mut decide: F) -> Result<R, DomainError>
    where
        R: Send,
        F: FnMut(Option<&T>) -> Result<Decision<T, R>, DomainError> + Send,
    {
        for attempt in 1..=self.max_attempts {
            let current = self.load(key).await?;

            let (op, outcome) = match (decide(current.as_ref().map(|row| &row.value))?, &current)
            {
                (Decision::Keep(outcome), _) | (Decision::Delete(outcome), None) => {
                    return Ok(outcome);
                }
                (Decision::Write(value, outcome), None) => {
                    (WriteOp::insert(self.table, key, &value)?, outcome)
                }
                (Decision::Write(value, outcome), Some(row)) => {
                    (WriteOp::update(self.table, key, row.version, &value)?, outcome)
                }
                (Decision::Delete(outcome), Some(row)) => {
                    (WriteOp::delete(self.table, key, row.version), outcome)
                }
            };

            match self.store.apply(op).await {
                Ok(_) => return Ok(outcome),
                Err(e) if e.is_write_conflict() => {
                    tracing::debug!(table = self.table, key, attempt, "write conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            table = self.table,
            key,
            attempts = self.max_attempts,
            "giving up after repeated write conflicts"
        );
        Err(DomainError::ContentionExhausted {
            table: self.table,
            key: key.to_string(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use row_store::InMemoryRowStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    fn handler() -> RowHandler<InMemoryRowStore, Counter> {
        RowHandler::new(InMemoryRowStore::new(), "counters")
    }

    async fn increment(handler: &RowHandler<InMemoryRowStore, Counter>) -> u32 {
        handler
            .execute("c", |current| {
                let next = Counter {
                    value: current.map(|c| c.value).unwrap_or(0) + 1,
                };
                Ok(Decision::Write(next.clone(), next.value))
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_inserts_then_updates() {
        let handler = handler();

        assert_eq!(increment(&handler).await, 1);
        assert_eq!(increment(&handler).await, 2);

        let row = handler.load("c").await.unwrap().unwrap();
        assert_eq!(row.value.value, 2);
        assert_eq!(row.version, Version::new(2));
    }

    #[tokio::test]
    async fn test_keep_does_not_write() {
        let handler = handler();
        increment(&handler).await;

        let seen = handler
            .execute("c", |current| Ok(Decision::Keep(current.cloned())))
            .await
            .unwrap();
        assert_eq!(seen, Some(Counter { value: 1 }));
        assert_eq!(handler.load("c").await.unwrap().unwrap().version, Version::first());
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_tolerates_missing() {
        let handler = handler();
        increment(&handler).await;

        handler.execute("c", |_| Ok(Decision::Delete(()))).await.unwrap();
        assert!(handler.load("c").await.unwrap().is_none());

        handler.execute("c", |_| Ok(Decision::Delete(()))).await.unwrap();
    }

    #[tokio::test]
    async fn test_decide_errors_are_returned_unchanged() {
        let handler = handler();
        let result: Result<(), _> = handler
            .execute("c", |_| Err(DomainError::InvalidQuantity { quantity: 0 }))
            .await;
        assert!(matches!(result, Err(DomainError::InvalidQuantity { quantity: 0 })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let handler = handler();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let handler = handler.clone();
            tasks.spawn(async move { increment(&handler).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let row = handler.load("c").await.unwrap().unwrap();
        assert_eq!(row.value.value, 20);
    }
}
