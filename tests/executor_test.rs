//! Integration tests for query execution and transactions on SQLite.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tenant_db::config::ExecutorSettings;
use tenant_db::db::{PoolManager, QueryExecutor, RetryPolicy};
use tenant_db::error::{DbError, DbResult};
use tenant_db::models::{InsertId, TenantConfig};
use tenant_db::params;

fn setup() -> (TempDir, QueryExecutor) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.db");
    let pools = Arc::new(PoolManager::new(TenantConfig::sqlite(path.to_string_lossy())));
    (dir, QueryExecutor::new(pools, ExecutorSettings::single_tenant()))
}

async fn create_items(executor: &QueryExecutor) {
    executor
        .query(
            "acme",
            "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, qty INTEGER, price REAL, meta TEXT)",
            &[],
        )
        .await
        .unwrap();
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: i64,
    name: String,
    qty: Option<i64>,
}

#[tokio::test]
async fn test_insert_reports_id_and_rows_decode() {
    let (_dir, executor) = setup();
    create_items(&executor).await;

    let first = executor
        .query(
            "acme",
            "INSERT INTO items (name, qty) VALUES (?, ?)",
            &params!["apple", 3],
        )
        .await
        .unwrap();
    assert_eq!(first.row_count, 1);
    assert_eq!(first.insert_id, Some(InsertId::Int(1)));

    executor
        .query(
            "acme",
            "INSERT INTO items (name, qty) VALUES (?, ?)",
            &params!["pear", None::<i64>],
        )
        .await
        .unwrap();

    let items = executor
        .query("acme", "SELECT id, name, qty FROM items ORDER BY id", &[])
        .await
        .unwrap()
        .decode::<Item>()
        .unwrap();
    assert_eq!(
        items.rows,
        vec![
            Item { id: 1, name: "apple".into(), qty: Some(3) },
            Item { id: 2, name: "pear".into(), qty: None },
        ]
    );
    executor.close().await;
}

#[tokio::test]
async fn test_update_reports_affected_rows() {
    let (_dir, executor) = setup();
    create_items(&executor).await;
    for name in ["a", "b", "c"] {
        executor
            .query("acme", "INSERT INTO items (name, qty) VALUES (?, 0)", &params![name])
            .await
            .unwrap();
    }

    let result = executor
        .query("acme", "UPDATE items SET qty = qty + 1 WHERE name <> ?", &params!["b"])
        .await
        .unwrap();
    assert_eq!(result.row_count, 2);
    assert!(result.rows.is_empty());
    executor.close().await;
}

#[tokio::test]
async fn test_failing_callback_persists_nothing() {
    let (_dir, executor) = setup();
    create_items(&executor).await;

    let result: DbResult<()> = executor
        .with_transaction("acme", |tx| {
            Box::pin(async move {
                for name in ["one", "two", "three"] {
                    tx.execute("INSERT INTO items (name) VALUES (?)", &params![name])
                        .await?;
                }
                Err(DbError::internal("business rule violated"))
            })
        })
        .await;
    assert!(matches!(result, Err(DbError::Internal { .. })));

    let count = executor
        .query("acme", "SELECT COUNT(*) AS n FROM items", &[])
        .await
        .unwrap();
    assert_eq!(count.scalar("n"), Some(&serde_json::json!(0)));
    executor.close().await;
}

#[tokio::test]
async fn test_failing_statement_rolls_back_earlier_writes() {
    let (_dir, executor) = setup();
    create_items(&executor).await;

    let result: DbResult<()> = executor
        .with_transaction("acme", |tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO items (name) VALUES (?)", &params!["kept?"])
                    .await?;
                // NOT NULL violation
                tx.execute("INSERT INTO items (name) VALUES (?)", &params![None::<String>])
                    .await?;
                Ok(())
            })
        })
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, DbError::QueryFailed { .. }));

    let rows = executor.query("acme", "SELECT * FROM items", &[]).await.unwrap();
    assert!(rows.is_empty());

    // the connection went back to the pool in a usable state
    executor.query("acme", "SELECT 1", &[]).await.unwrap();
    executor.close().await;
}

#[tokio::test]
async fn test_transaction_returns_callback_value() {
    let (_dir, executor) = setup();
    create_items(&executor).await;

    let name = String::from("widget");
    let id = executor
        .with_transaction("acme", move |tx| {
            Box::pin(async move {
                let result = tx
                    .query("INSERT INTO items (name) VALUES (?)", &params![name])
                    .await?;
                Ok(result.insert_id.and_then(|id| id.as_i64()))
            })
        })
        .await
        .unwrap();
    assert_eq!(id, Some(1));
    executor.close().await;
}

#[tokio::test]
async fn test_json_and_float_values() {
    let (_dir, executor) = setup();
    create_items(&executor).await;

    let meta = serde_json::json!({"color": "red", "tags": ["a", "b"]});
    executor
        .query(
            "acme",
            "INSERT INTO items (name, price, meta) VALUES (?, ?, ?)",
            &params!["apple", 1.25, meta.clone()],
        )
        .await
        .unwrap();

    let row = executor
        .query("acme", "SELECT price, meta FROM items", &[])
        .await
        .unwrap();
    assert_eq!(row.scalar("price"), Some(&serde_json::json!(1.25)));
    let stored: serde_json::Value =
        serde_json::from_str(row.scalar("meta").unwrap().as_str().unwrap()).unwrap();
    assert_eq!(stored, meta);
    executor.close().await;
}

#[tokio::test]
async fn test_retry_gives_up_on_non_deadlock_errors() {
    let (_dir, executor) = setup();
    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let policy = RetryPolicy::new(5, Duration::from_millis(1));

    let result: DbResult<()> = executor
        .with_transaction_retry("acme", &policy, move |tx| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async move {
                tx.execute("INSERT INTO no_such_table (x) VALUES (1)", &[]).await?;
                Ok(())
            })
        })
        .await;
    let err = result.unwrap_err();
    assert!(err.is_missing_table());
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    executor.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_dir, executor) = setup();
    // never used: nothing to close
    executor.close().await;

    executor.query("acme", "SELECT 1", &[]).await.unwrap();
    executor.close().await;
    executor.close().await;
}
