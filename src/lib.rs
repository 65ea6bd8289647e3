//! tenant-db library
//!
//! Multi-tenant database access layer: every tenant's data lives in its own
//! database (SQLite, PostgreSQL, MySQL or MariaDB), located through a catalog
//! in a master database. The crate resolves tenants, owns one connection pool
//! per tenant database, executes queries and transactions with deadlock-aware
//! retry, and provisions tenant databases with migrations and seeders.

pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod models;
pub mod schema;
pub mod seed;

pub use config::{Config, ExecutorSettings, MigrationDirection};
pub use db::{PoolManager, QueryExecutor, RetryPolicy, TenantCatalog, Transaction};
pub use error::{DbError, DbResult};
pub use migrate::Migrator;
pub use seed::SeedRunner;
