//! Reference-data seeding.
//!
//! Seeders populate per-tenant reference rows. Unlike migrations nothing is
//! recorded about a run; every seeder checks before inserting, so running
//! [`SeedRunner::seed`] again never duplicates data.

pub mod definitions;

use crate::db::{QueryExecutor, Transaction};
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Idempotent population of reference data for one tenant.
pub trait Seeder: Send + Sync {
    /// Unique name, `NNN_description`.
    fn name(&self) -> &str;

    fn up<'a>(&'a self, tx: &'a mut Transaction, tenant_id: &'a str)
    -> BoxFuture<'a, DbResult<()>>;

    fn down<'a>(
        &'a self,
        tx: &'a mut Transaction,
        tenant_id: &'a str,
    ) -> BoxFuture<'a, DbResult<()>>;
}

pub type SeederRef = Arc<dyn Seeder>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedAction {
    Seed,
    Reset,
}

impl std::fmt::Display for SeedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seed => write!(f, "seed"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Outcome of a seed or reset run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub tenant_id: String,
    pub action: SeedAction,
    /// Seeders run, in execution order
    pub seeders: Vec<String>,
}

/// Runs seeders in name order, each in its own transaction.
#[derive(Clone)]
pub struct SeedRunner {
    executor: QueryExecutor,
    seeders: Vec<SeederRef>,
}

impl std::fmt::Debug for SeedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedRunner")
            .field("seeders", &self.names())
            .finish_non_exhaustive()
    }
}

impl SeedRunner {
    pub fn new(executor: QueryExecutor, mut seeders: Vec<SeederRef>) -> DbResult<Self> {
        let mut seen = HashSet::new();
        for seeder in &seeders {
            if !seen.insert(seeder.name().to_string()) {
                return Err(DbError::config(format!(
                    "Seeder '{}' is registered twice",
                    seeder.name()
                )));
            }
        }
        seeders.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Self { executor, seeders })
    }

    /// Runner over the built-in seeders.
    pub fn with_builtin(executor: QueryExecutor) -> DbResult<Self> {
        Self::new(executor, definitions::builtin())
    }

    pub fn names(&self) -> Vec<&str> {
        self.seeders.iter().map(|s| s.name()).collect()
    }

    /// Run every seeder's `up` in order.
    pub async fn seed(&self, tenant_id: &str) -> DbResult<SeedReport> {
        self.run(tenant_id, SeedAction::Seed, self.seeders.iter().collect())
            .await
    }

    /// Run every seeder's `down` in reverse order.
    pub async fn reset(&self, tenant_id: &str) -> DbResult<SeedReport> {
        self.run(tenant_id, SeedAction::Reset, self.seeders.iter().rev().collect())
            .await
    }

    async fn run(
        &self,
        tenant_id: &str,
        action: SeedAction,
        seeders: Vec<&SeederRef>,
    ) -> DbResult<SeedReport> {
        let mut report = SeedReport {
            tenant_id: tenant_id.to_string(),
            action,
            seeders: Vec::with_capacity(seeders.len()),
        };

        for seeder in seeders {
            let name = seeder.name().to_string();
            info!(tenant_id = %tenant_id, seeder = %name, %action, "Running seeder");

            let seeder = Arc::clone(seeder);
            let tenant = tenant_id.to_string();
            let outcome = self
                .executor
                .with_transaction(tenant_id, move |tx| {
                    Box::pin(async move {
                        match action {
                            SeedAction::Seed => seeder.up(tx, &tenant).await,
                            SeedAction::Reset => seeder.down(tx, &tenant).await,
                        }
                    })
                })
                .await;

            if let Err(e) = outcome {
                error!(tenant_id = %tenant_id, seeder = %name, error = %e, "Seeder failed");
                return Err(DbError::seed_failed(name, e));
            }
            report.seeders.push(name);
        }

        info!(
            tenant_id = %tenant_id,
            %action,
            seeders = report.seeders.len(),
            "Seeding finished"
        );
        Ok(report)
    }
}
