//! Integration tests for the seeder engine on SQLite.

use std::sync::Arc;
use tempfile::TempDir;
use tenant_db::config::ExecutorSettings;
use tenant_db::db::{PoolManager, QueryExecutor};
use tenant_db::error::DbError;
use tenant_db::migrate::Migrator;
use tenant_db::models::TenantConfig;
use tenant_db::params;
use tenant_db::seed::{SeedAction, SeedRunner};

async fn migrated() -> (TempDir, QueryExecutor) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tenant.db");
    let pools = Arc::new(PoolManager::new(TenantConfig::sqlite(path.to_string_lossy())));
    let executor = QueryExecutor::new(pools, ExecutorSettings::single_tenant());
    Migrator::with_builtin(executor.clone())
        .unwrap()
        .up("acme")
        .await
        .unwrap();
    (dir, executor)
}

async fn count(executor: &QueryExecutor, table: &str) -> i64 {
    executor
        .query("acme", &format!("SELECT COUNT(*) AS n FROM {}", table), &[])
        .await
        .unwrap()
        .scalar("n")
        .and_then(|v| v.as_i64())
        .unwrap()
}

#[tokio::test]
async fn test_seed_populates_reference_data() {
    let (_dir, executor) = migrated().await;
    let runner = SeedRunner::with_builtin(executor.clone()).unwrap();

    let report = runner.seed("acme").await.unwrap();
    assert_eq!(report.action, SeedAction::Seed);
    assert_eq!(report.seeders, vec!["001_task_statuses", "002_default_settings"]);

    assert_eq!(count(&executor, "task_statuses").await, 3);
    let tenant = executor
        .query(
            "acme",
            "SELECT setting_value FROM settings WHERE setting_key = ?",
            &params!["tenant_id"],
        )
        .await
        .unwrap();
    assert_eq!(tenant.scalar("setting_value"), Some(&serde_json::json!("acme")));
    executor.close().await;
}

#[tokio::test]
async fn test_seed_twice_does_not_duplicate() {
    let (_dir, executor) = migrated().await;
    let runner = SeedRunner::with_builtin(executor.clone()).unwrap();

    runner.seed("acme").await.unwrap();
    let statuses = count(&executor, "task_statuses").await;
    let settings = count(&executor, "settings").await;

    runner.seed("acme").await.unwrap();
    assert_eq!(count(&executor, "task_statuses").await, statuses);
    assert_eq!(count(&executor, "settings").await, settings);
    executor.close().await;
}

#[tokio::test]
async fn test_reset_runs_in_reverse_and_removes_rows() {
    let (_dir, executor) = migrated().await;
    let runner = SeedRunner::with_builtin(executor.clone()).unwrap();
    runner.seed("acme").await.unwrap();

    let report = runner.reset("acme").await.unwrap();
    assert_eq!(report.action, SeedAction::Reset);
    assert_eq!(report.seeders, vec!["002_default_settings", "001_task_statuses"]);
    assert_eq!(count(&executor, "task_statuses").await, 0);
    assert_eq!(count(&executor, "settings").await, 0);
    executor.close().await;
}

#[tokio::test]
async fn test_seed_without_schema_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.db");
    let pools = Arc::new(PoolManager::new(TenantConfig::sqlite(path.to_string_lossy())));
    let executor = QueryExecutor::new(pools, ExecutorSettings::single_tenant());
    let runner = SeedRunner::with_builtin(executor.clone()).unwrap();

    let err = runner.seed("acme").await.unwrap_err();
    match &err {
        DbError::SeedFailed { seeder, source } => {
            assert_eq!(seeder, "001_task_statuses");
            assert!(source.is_missing_table());
        }
        other => panic!("expected SeedFailed, got {:?}", other),
    }
    executor.close().await;
}
