//! Schema migrations.
//!
//! Migrations are registered statically in a [`MigrationSet`]. The set is
//! ordered by name, except that the system migration, which creates the
//! bookkeeping table, always comes first. [`Migrator`] applies or reverts the
//! set against one tenant database. Each migration runs together with its
//! bookkeeping change in a single transaction, and the first failure stops the
//! batch.

pub mod definitions;

use crate::config::MigrationDirection;
use crate::db::{QueryExecutor, Transaction};
use crate::error::{DbError, DbResult};
use crate::params;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Bookkeeping table recording applied migrations.
pub const MIGRATIONS_TABLE: &str = "migrations";

const SELECT_APPLIED: &str = "SELECT migration_name FROM migrations";
const RECORD_APPLIED: &str = "INSERT INTO migrations (migration_name) VALUES (?)";
const FORGET_APPLIED: &str = "DELETE FROM migrations WHERE migration_name = ?";

/// One schema change with its inverse.
pub trait Migration: Send + Sync {
    /// Unique name, `NNN_description`.
    fn name(&self) -> &str;

    /// Whether this migration owns the bookkeeping table.
    fn is_system(&self) -> bool {
        false
    }

    fn up<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>>;

    fn down<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>>;
}

pub type MigrationRef = Arc<dyn Migration>;

/// Ordered list of migrations.
#[derive(Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<MigrationRef>,
}

impl std::fmt::Debug for MigrationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl MigrationSet {
    /// Order `migrations`, rejecting empty or duplicate names and more than one
    /// system migration.
    pub fn new(mut migrations: Vec<MigrationRef>) -> DbResult<Self> {
        let mut seen = HashSet::new();
        for migration in &migrations {
            let name = migration.name();
            if name.trim().is_empty() {
                return Err(DbError::config("Migration name cannot be empty"));
            }
            if !seen.insert(name.to_string()) {
                return Err(DbError::config(format!(
                    "Migration '{}' is registered twice",
                    name
                )));
            }
        }
        if migrations.iter().filter(|m| m.is_system()).count() > 1 {
            return Err(DbError::config("Only one system migration may be registered"));
        }

        migrations.sort_by(|a, b| {
            b.is_system()
                .cmp(&a.is_system())
                .then_with(|| a.name().cmp(b.name()))
        });
        Ok(Self { migrations })
    }

    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MigrationRef> {
        self.migrations.iter()
    }
}

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub tenant_id: String,
    pub direction: MigrationDirection,
    /// Migrations applied by this run, in execution order
    pub applied: Vec<String>,
    /// Migrations reverted by this run, in execution order
    pub reverted: Vec<String>,
    /// Migrations that were already in the requested state
    pub skipped: Vec<String>,
}

impl MigrationReport {
    fn new(tenant_id: &str, direction: MigrationDirection) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            direction,
            applied: Vec::new(),
            reverted: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Whether a migration has been applied to a tenant database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub applied: bool,
}

/// Applies and reverts a [`MigrationSet`] per tenant.
#[derive(Debug, Clone)]
pub struct Migrator {
    executor: QueryExecutor,
    migrations: MigrationSet,
}

impl Migrator {
    pub fn new(executor: QueryExecutor, migrations: MigrationSet) -> Self {
        Self {
            executor,
            migrations,
        }
    }

    /// Migrator over the built-in migrations.
    pub fn with_builtin(executor: QueryExecutor) -> DbResult<Self> {
        Ok(Self::new(executor, definitions::builtin()?))
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// Apply (`Up`) or revert (`Down`) the set for a tenant.
    pub async fn run(
        &self,
        direction: MigrationDirection,
        tenant_id: &str,
    ) -> DbResult<MigrationReport> {
        match direction {
            MigrationDirection::Up => self.up(tenant_id).await,
            MigrationDirection::Down => self.down(tenant_id).await,
        }
    }

    /// Apply every migration not yet recorded, in order.
    pub async fn up(&self, tenant_id: &str) -> DbResult<MigrationReport> {
        let applied = self.applied(tenant_id).await?;
        let mut report = MigrationReport::new(tenant_id, MigrationDirection::Up);

        for migration in self.migrations.iter() {
            let name = migration.name().to_string();
            if applied.contains(&name) {
                debug!(tenant_id = %tenant_id, migration = %name, "Migration already applied");
                report.skipped.push(name);
                continue;
            }

            info!(tenant_id = %tenant_id, migration = %name, "Applying migration");
            let migration = Arc::clone(migration);
            let record = params![name.as_str()];
            let outcome = self
                .executor
                .with_transaction(tenant_id, move |tx| {
                    Box::pin(async move {
                        migration.up(tx).await?;
                        tx.execute(RECORD_APPLIED, &record).await?;
                        Ok(())
                    })
                })
                .await;

            if let Err(e) = outcome {
                error!(tenant_id = %tenant_id, migration = %name, error = %e, "Migration failed");
                return Err(DbError::migration_failed(name, e));
            }
            report.applied.push(name);
        }

        info!(
            tenant_id = %tenant_id,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "Migrations up to date"
        );
        Ok(report)
    }

    /// Revert every recorded migration, newest first.
    ///
    /// The system migration is reverted last. Its bookkeeping row disappears
    /// with the table, so no row is deleted for it.
    pub async fn down(&self, tenant_id: &str) -> DbResult<MigrationReport> {
        let applied = self.applied(tenant_id).await?;
        let mut report = MigrationReport::new(tenant_id, MigrationDirection::Down);

        for migration in self.migrations.iter().rev() {
            let name = migration.name().to_string();
            if !applied.contains(&name) {
                debug!(tenant_id = %tenant_id, migration = %name, "Migration not applied");
                report.skipped.push(name);
                continue;
            }

            info!(tenant_id = %tenant_id, migration = %name, "Reverting migration");
            let forget = (!migration.is_system()).then(|| params![name.as_str()]);
            let migration = Arc::clone(migration);
            let outcome = self
                .executor
                .with_transaction(tenant_id, move |tx| {
                    Box::pin(async move {
                        migration.down(tx).await?;
                        if let Some(record) = &forget {
                            tx.execute(FORGET_APPLIED, record).await?;
                        }
                        Ok(())
                    })
                })
                .await;

            if let Err(e) = outcome {
                error!(tenant_id = %tenant_id, migration = %name, error = %e, "Revert failed");
                return Err(DbError::migration_failed(name, e));
            }
            report.reverted.push(name);
        }

        info!(
            tenant_id = %tenant_id,
            reverted = report.reverted.len(),
            "Migrations reverted"
        );
        Ok(report)
    }

    /// Applied state of every migration in the set.
    pub async fn status(&self, tenant_id: &str) -> DbResult<Vec<MigrationStatus>> {
        let applied = self.applied(tenant_id).await?;
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                name: m.name().to_string(),
                applied: applied.contains(m.name()),
            })
            .collect())
    }

    /// Names recorded in the bookkeeping table; empty when it does not exist.
    async fn applied(&self, tenant_id: &str) -> DbResult<HashSet<String>> {
        match self.executor.query(tenant_id, SELECT_APPLIED, &[]).await {
            Ok(result) => Ok(result
                .rows
                .iter()
                .filter_map(|row| row.get("migration_name").and_then(JsonValue::as_str))
                .map(String::from)
                .collect()),
            Err(e) if e.is_missing_table() => {
                debug!(tenant_id = %tenant_id, "No bookkeeping table yet");
                Ok(HashSet::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, bool);

    impl Migration for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn is_system(&self) -> bool {
            self.1
        }

        fn up<'a>(&'a self, _tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn down<'a>(&'a self, _tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn named(name: &'static str, system: bool) -> MigrationRef {
        Arc::new(Named(name, system))
    }

    #[test]
    fn test_system_migration_sorts_first() {
        let set = MigrationSet::new(vec![
            named("002_b", false),
            named("zzz_bookkeeping", true),
            named("001_a", false),
        ])
        .unwrap();
        assert_eq!(set.names(), vec!["zzz_bookkeeping", "001_a", "002_b"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = MigrationSet::new(vec![named("001_a", false), named("001_a", false)]).unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
    }

    #[test]
    fn test_two_system_migrations_rejected() {
        let err = MigrationSet::new(vec![named("000_a", true), named("000_b", true)]).unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
    }

    #[test]
    fn test_builtin_set_order() {
        let set = definitions::builtin().unwrap();
        let names = set.names();
        assert_eq!(names[0], "000_create_migrations_table");
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
