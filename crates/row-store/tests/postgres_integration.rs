//! PostgreSQL integration tests
//!
//! These tests start a shared PostgreSQL container and need a Docker daemon,
//! so they are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p row-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use row_store::{PostgresRowStore, RowStore, RowStoreExt, StoreError, Version, WriteOp};
use serde_json::json;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresRowStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and an empty rows table
async fn get_test_store() -> PostgresRowStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE rows")
        .execute(&pool)
        .await
        .unwrap();

    PostgresRowStore::new(pool)
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_insert_then_get() {
    let store = get_test_store().await;

    let version = store
        .insert("stock", "SKU-1", json!({ "available": 4, "reserved": 0 }))
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let row = store.get("stock", "SKU-1").await.unwrap().unwrap();
    assert_eq!(row.version, Version::first());
    assert_eq!(row.data["available"], 4);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_duplicate_insert_is_rejected() {
    let store = get_test_store().await;
    store.insert("stock", "SKU-1", json!(1)).await.unwrap();

    let result = store.insert("stock", "SKU-1", json!(2)).await;
    assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_compare_and_swap_detects_stale_version() {
    let store = get_test_store().await;
    store.insert("orders", "o1", json!({ "state": "Reserved" })).await.unwrap();

    let v2 = store
        .compare_and_swap("orders", "o1", Version::first(), json!({ "state": "Paid" }))
        .await
        .unwrap();
    assert_eq!(v2, Version::new(2));

    let stale = store
        .compare_and_swap("orders", "o1", Version::first(), json!({ "state": "Cancelled" }))
        .await;
    match stale {
        Err(StoreError::ConcurrencyConflict { actual, .. }) => assert_eq!(actual, Version::new(2)),
        other => panic!("expected conflict, got {other:?}"),
    }

    let missing = store
        .compare_and_swap("orders", "o2", Version::first(), json!({}))
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_transaction_is_all_or_nothing() {
    let store = get_test_store().await;
    store.insert("reservations", "r1", json!({})).await.unwrap();

    let result = store
        .transaction(vec![
            WriteOp::insert("orders", "o1", &json!({})).unwrap(),
            WriteOp::insert("reservations", "r1", &json!({})).unwrap(),
        ])
        .await;
    assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    assert!(store.get("orders", "o1").await.unwrap().is_none());

    let versions = store
        .transaction(vec![
            WriteOp::insert("orders", "o1", &json!({})).unwrap(),
            WriteOp::delete("reservations", "r1", Version::first()),
        ])
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert!(store.get("reservations", "r1").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_scan_is_scoped_to_table() {
    let store = get_test_store().await;
    store.insert("stock", "b", json!(2)).await.unwrap();
    store.insert("stock", "a", json!(1)).await.unwrap();
    store.insert("carts", "c", json!(3)).await.unwrap();

    let rows = store.load_all::<i64>("stock").await.unwrap();
    let values: Vec<_> = rows.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a Docker daemon"]
async fn test_racing_writers_have_one_winner() {
    let store = get_test_store().await;
    store.insert("stock", "SKU-1", json!(0)).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let store = store.clone();
        tasks.spawn(async move {
            store
                .compare_and_swap("stock", "SKU-1", Version::first(), json!(i))
                .await
                .is_ok()
        });
    }

    let mut winners = 0;
    while let Some(ok) = tasks.join_next().await {
        if ok.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
