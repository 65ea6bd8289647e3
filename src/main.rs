//! tenant-db - Main entry point.
//!
//! Thin command-line wrapper over the library: runs migrations, seeders and
//! health checks for one tenant, or installs the tenant catalog. Reports are
//! printed to stdout as JSON; failures exit non-zero.

use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tenant_db::config::{Command, Config};
use tenant_db::db::{PoolManager, QueryExecutor, TenantCatalog};
use tenant_db::error::{DbError, DbResult};
use tenant_db::migrate::Migrator;
use tenant_db::seed::SeedRunner;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only the report
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> DbResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DbError::internal(format!("Failed to serialize report: {e}")))?;
    println!("{text}");
    Ok(())
}

async fn run(config: &Config, pools: &Arc<PoolManager>) -> DbResult<()> {
    let settings = config.executor_settings();
    let executor = QueryExecutor::new(Arc::clone(pools), settings.clone());

    match &config.command {
        Command::Migrate { direction, tenant } => {
            let report = Migrator::with_builtin(executor)?
                .run(*direction, tenant)
                .await?;
            print_json(&report)
        }
        Command::Seed { tenant } => {
            let report = SeedRunner::with_builtin(executor)?.seed(tenant).await?;
            print_json(&report)
        }
        Command::ResetSeed { tenant } => {
            let report = SeedRunner::with_builtin(executor)?.reset(tenant).await?;
            print_json(&report)
        }
        Command::Health { tenant } => {
            let status = executor.health_check(tenant).await?;
            print_json(&status)?;
            if status.healthy {
                Ok(())
            } else {
                Err(DbError::connection(
                    status.error.unwrap_or_else(|| "database did not answer".to_string()),
                    "Check the tenant's catalog row and that its database is reachable",
                ))
            }
        }
        Command::InitCatalog => {
            let catalog = TenantCatalog::new(Arc::clone(pools), settings.catalog_table.as_str())?;
            catalog.install().await?;
            print_json(&serde_json::json!({
                "catalog_table": settings.catalog_table,
                "installed": true,
            }))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        command = ?config.command,
        multi_tenant = config.multi_tenant,
        "Starting tenant-db v{}",
        env!("CARGO_PKG_VERSION")
    );

    let master = match config.master_config() {
        Ok(master) => master,
        Err(e) => {
            error!(error = %e, "Invalid master database configuration");
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pools = Arc::new(PoolManager::new(master));
    let result = run(&config, &pools).await;
    pools.close_all().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {suggestion}");
            }
            ExitCode::FAILURE
        }
    }
}
