//! Database access layer.
//!
//! This module provides the tenant-aware database plumbing:
//! - Driver adapters and pooled connections
//! - Per-tenant pool lifecycle
//! - Tenant resolution through the master catalog
//! - Query execution, transactions and deadlock retry
//! - Row decoding into JSON values
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod catalog;
pub mod executor;
pub mod params;
pub mod pool;
pub mod pool_manager;
pub mod resolver;
pub mod retry;
pub mod sql;
pub mod types;

pub use catalog::TenantCatalog;
pub use executor::{HealthStatus, QueryExecutor, Transaction};
pub use pool::{DbPool, PooledConnection};
pub use pool_manager::PoolManager;
pub use resolver::{PRIMARY_TENANT, ResolvedTenant, TenantResolver};
pub use retry::{RetryPolicy, retry_on_deadlock};
