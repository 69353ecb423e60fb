//! Persistence layer for the inventory and order engine.
//!
//! Rows are JSON documents addressed by `(table, key)` and carry a
//! [`Version`] that increments on every write. All writes are conditional:
//! inserts fail if the row exists, updates and deletes fail unless the caller
//! names the row's current version. Small groups of writes can be applied
//! all-or-nothing through [`RowStore::transaction`].

pub mod error;
pub mod memory;
pub mod postgres;
pub mod row;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryRowStore;
pub use postgres::PostgresRowStore;
pub use row::{Row, Version, Versioned};
pub use store::{RowStore, RowStoreExt, WriteOp};
