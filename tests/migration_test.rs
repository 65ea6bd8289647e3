//! Integration tests for the migration engine on SQLite.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tempfile::TempDir;
use tenant_db::config::{ExecutorSettings, MigrationDirection};
use tenant_db::db::{PoolManager, QueryExecutor, Transaction};
use tenant_db::error::{DbError, DbResult};
use tenant_db::migrate::definitions::{self, TableMigration};
use tenant_db::migrate::{Migration, MigrationRef, MigrationSet, Migrator};
use tenant_db::models::TenantConfig;
use tenant_db::schema::TableBuilder;

fn setup() -> (TempDir, QueryExecutor) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tenant.db");
    let pools = Arc::new(PoolManager::new(TenantConfig::sqlite(path.to_string_lossy())));
    (dir, QueryExecutor::new(pools, ExecutorSettings::single_tenant()))
}

async fn table_names(executor: &QueryExecutor) -> Vec<String> {
    executor
        .query(
            "acme",
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )
        .await
        .unwrap()
        .rows
        .iter()
        .map(|row| row["name"].as_str().unwrap().to_string())
        .collect()
}

async fn recorded(executor: &QueryExecutor) -> Vec<String> {
    executor
        .query("acme", "SELECT migration_name FROM migrations ORDER BY id", &[])
        .await
        .unwrap()
        .rows
        .iter()
        .map(|row| row["migration_name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_up_applies_all_in_order() {
    let (_dir, executor) = setup();
    let migrator = Migrator::with_builtin(executor.clone()).unwrap();

    let report = migrator.run(MigrationDirection::Up, "acme").await.unwrap();
    assert_eq!(report.direction, MigrationDirection::Up);
    assert_eq!(report.applied, migrator.migrations().names());
    assert!(report.skipped.is_empty());

    assert_eq!(recorded(&executor).await, migrator.migrations().names());
    assert_eq!(
        table_names(&executor).await,
        vec!["migrations", "settings", "task_statuses", "tasks", "todos", "users"]
    );
    executor.close().await;
}

#[tokio::test]
async fn test_up_twice_is_a_no_op() {
    let (_dir, executor) = setup();
    let migrator = Migrator::with_builtin(executor.clone()).unwrap();

    migrator.up("acme").await.unwrap();
    let tables = table_names(&executor).await;

    let second = migrator.up("acme").await.unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.skipped.len(), migrator.migrations().len());
    assert_eq!(table_names(&executor).await, tables);
    assert_eq!(recorded(&executor).await.len(), migrator.migrations().len());
    executor.close().await;
}

#[tokio::test]
async fn test_down_then_up_restores_schema() {
    let (_dir, executor) = setup();
    let migrator = Migrator::with_builtin(executor.clone()).unwrap();

    migrator.up("acme").await.unwrap();
    let tables = table_names(&executor).await;

    let down = migrator.run(MigrationDirection::Down, "acme").await.unwrap();
    let mut expected: Vec<&str> = migrator.migrations().names();
    expected.reverse();
    assert_eq!(down.reverted, expected);
    assert_eq!(*down.reverted.last().unwrap(), "000_create_migrations_table");
    assert!(table_names(&executor).await.is_empty());

    // a second down finds nothing recorded
    let again = migrator.down("acme").await.unwrap();
    assert!(again.reverted.is_empty());

    migrator.up("acme").await.unwrap();
    assert_eq!(table_names(&executor).await, tables);
    executor.close().await;
}

#[tokio::test]
async fn test_status_tracks_applied_migrations() {
    let (_dir, executor) = setup();
    let migrator = Migrator::with_builtin(executor.clone()).unwrap();

    let before = migrator.status("acme").await.unwrap();
    assert!(before.iter().all(|s| !s.applied));

    migrator.up("acme").await.unwrap();
    let after = migrator.status("acme").await.unwrap();
    assert!(after.iter().all(|s| s.applied));
    executor.close().await;
}

struct Broken;

impl Migration for Broken {
    fn name(&self) -> &str {
        "002_broken"
    }

    fn up<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            tx.execute_raw("CREATE TABLE half_done (id INTEGER)").await?;
            tx.execute_raw("THIS IS NOT SQL").await?;
            Ok(())
        })
    }

    fn down<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move { TableBuilder::drop(tx, "half_done").await })
    }
}

fn first_table(t: &mut TableBuilder) -> DbResult<()> {
    t.id();
    t.string("label")?;
    Ok(())
}

#[tokio::test]
async fn test_failure_stops_the_batch() {
    let (_dir, executor) = setup();
    let builtin = definitions::builtin().unwrap();
    let system = Arc::clone(builtin.iter().next().unwrap());
    let set = MigrationSet::new(vec![
        system,
        Arc::new(TableMigration::new("001_first", "first_table", first_table)) as MigrationRef,
        Arc::new(Broken) as MigrationRef,
        Arc::new(TableMigration::new("003_never", "never_table", first_table)) as MigrationRef,
    ])
    .unwrap();
    let migrator = Migrator::new(executor.clone(), set);

    let err = migrator.up("acme").await.unwrap_err();
    match &err {
        DbError::MigrationFailed { migration, .. } => assert_eq!(migration, "002_broken"),
        other => panic!("expected MigrationFailed, got {:?}", other),
    }

    // earlier migrations stay applied; the failed one rolled back; later ones never ran
    assert_eq!(
        recorded(&executor).await,
        vec!["000_create_migrations_table", "001_first"]
    );
    let tables = table_names(&executor).await;
    assert!(tables.contains(&"first_table".to_string()));
    assert!(!tables.contains(&"half_done".to_string()));
    assert!(!tables.contains(&"never_table".to_string()));
    executor.close().await;
}
