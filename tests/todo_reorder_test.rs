//! Reordering todos through transactions on a migrated tenant database.

use std::sync::Arc;
use tempfile::TempDir;
use tenant_db::config::ExecutorSettings;
use tenant_db::db::{PoolManager, QueryExecutor};
use tenant_db::error::DbResult;
use tenant_db::migrate::Migrator;
use tenant_db::models::TenantConfig;
use tenant_db::params;

async fn insert(executor: &QueryExecutor, sql: &str, values: Vec<tenant_db::models::QueryParam>) -> i64 {
    executor
        .query("acme", sql, &values)
        .await
        .unwrap()
        .insert_id
        .and_then(|id| id.as_i64())
        .unwrap()
}

async fn reorder(executor: &QueryExecutor, ids: Vec<i64>) -> DbResult<()> {
    executor
        .with_transaction("acme", move |tx| {
            Box::pin(async move {
                for (position, id) in ids.iter().enumerate() {
                    tx.execute(
                        "UPDATE todos SET position = ? WHERE id = ?",
                        &params![position as i64, *id],
                    )
                    .await?;
                }
                Ok(())
            })
        })
        .await
}

async fn position(executor: &QueryExecutor, id: i64) -> i64 {
    executor
        .query("acme", "SELECT position FROM todos WHERE id = ?", &params![id])
        .await
        .unwrap()
        .scalar("position")
        .and_then(|v| v.as_i64())
        .unwrap()
}

#[tokio::test]
async fn test_reorder_reflects_latest_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tenant.db");
    let pools = Arc::new(PoolManager::new(TenantConfig::sqlite(path.to_string_lossy())));
    let executor = QueryExecutor::new(pools, ExecutorSettings::single_tenant());
    Migrator::with_builtin(executor.clone())
        .unwrap()
        .up("acme")
        .await
        .unwrap();

    let user = insert(
        &executor,
        "INSERT INTO users (name, email, password) VALUES (?, ?, ?)",
        params!["Ada", "ada@example.com", "hash"],
    )
    .await;
    let a = insert(
        &executor,
        "INSERT INTO todos (user_id, title) VALUES (?, ?)",
        params![user, "A"],
    )
    .await;
    let b = insert(
        &executor,
        "INSERT INTO todos (user_id, title) VALUES (?, ?)",
        params![user, "B"],
    )
    .await;

    reorder(&executor, vec![b, a]).await.unwrap();
    assert!(position(&executor, b).await < position(&executor, a).await);

    reorder(&executor, vec![a, b]).await.unwrap();
    assert!(position(&executor, a).await < position(&executor, b).await);

    executor.close().await;
}
