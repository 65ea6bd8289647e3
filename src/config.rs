//! Configuration handling for tenant-db.
//!
//! This module provides configuration management via CLI arguments and environment variables,
//! plus the pool defaults applied to every tenant pool.

use crate::error::DbResult;
use crate::models::TenantConfig;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CATALOG_TABLE: &str = "tenants";

// Pool configuration defaults. A tenant without explicit settings gets a minimal
// pool rather than inheriting another tenant's capacity.
pub const DEFAULT_CONNECTION_LIMIT: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Connection pool configuration options for one tenant database.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 1)
    pub connection_limit: Option<u32>,
    /// Connection acquire timeout in seconds (default: 60)
    pub acquire_timeout_secs: Option<u64>,
    /// Idle timeout in seconds (default: 30)
    pub idle_timeout_secs: Option<u64>,
    /// MySQL/MariaDB connection charset (default: utf8mb4)
    pub charset: Option<String>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get connection_limit with default value.
    pub fn connection_limit_or_default(&self) -> u32 {
        self.connection_limit.unwrap_or(DEFAULT_CONNECTION_LIMIT)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get charset with default value.
    pub fn charset_or_default(&self) -> &str {
        self.charset.as_deref().unwrap_or(DEFAULT_CHARSET)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Set the connection limit.
    pub fn with_connection_limit(mut self, limit: u32) -> Self {
        self.connection_limit = Some(limit);
        self
    }

    /// Set the acquire timeout in seconds.
    pub fn with_acquire_timeout(mut self, secs: u64) -> Self {
        self.acquire_timeout_secs = Some(secs);
        self
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.connection_limit == Some(0) {
            return Err("connection_limit must be greater than 0".to_string());
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Runtime switches shared by the resolver and the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// When false, every tenant id resolves to the primary database without a catalog lookup.
    pub multi_tenant: bool,
    /// When true, an unknown tenant is an error instead of falling back to the primary database.
    pub strict_tenancy: bool,
    /// Table in the master database holding tenant connection rows.
    pub catalog_table: String,
    /// Timeout applied to `query` when the caller gives none.
    pub query_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            multi_tenant: true,
            strict_tenancy: false,
            catalog_table: DEFAULT_CATALOG_TABLE.to_string(),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

impl ExecutorSettings {
    /// Settings for a deployment without multi-tenancy.
    pub fn single_tenant() -> Self {
        Self {
            multi_tenant: false,
            ..Self::default()
        }
    }

    /// Enable or disable strict tenancy.
    pub fn with_strict_tenancy(mut self, strict: bool) -> Self {
        self.strict_tenancy = strict;
        self
    }
}

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply pending migrations
    Up,
    /// Revert applied migrations
    Down,
}

impl std::fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Commands exposed by the CLI wrapper.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run migrations for a tenant
    Migrate {
        #[arg(value_enum)]
        direction: MigrationDirection,
        /// Tenant identifier
        #[arg(long, short)]
        tenant: String,
    },
    /// Populate reference data for a tenant
    Seed {
        #[arg(long, short)]
        tenant: String,
    },
    /// Remove seeded reference data for a tenant
    ResetSeed {
        #[arg(long, short)]
        tenant: String,
    },
    /// Check connectivity for a tenant database
    Health {
        #[arg(long, short)]
        tenant: String,
    },
    /// Create the tenant catalog table in the master database
    InitCatalog,
}

/// Configuration for tenant-db.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tenant-db",
    about = "Multi-tenant database tooling - migrations, seeders and health checks per tenant",
    version,
    author
)]
pub struct Config {
    /// Master database holding the tenant catalog; also the primary database
    /// when multi-tenancy is disabled.
    /// Pool options may be given as query parameters, e.g. ?connection_limit=5
    #[arg(long, value_name = "URL", env = "TENANT_DB_MASTER_URL")]
    pub master_url: String,

    /// Resolve tenants through the catalog (false: every tenant uses the master database)
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "TENANT_DB_MULTI_TENANT"
    )]
    pub multi_tenant: bool,

    /// Fail on unknown tenants instead of falling back to the master database
    #[arg(long, env = "TENANT_DB_STRICT_TENANCY")]
    pub strict_tenancy: bool,

    /// Catalog table name in the master database
    #[arg(long, default_value = DEFAULT_CATALOG_TABLE, env = "TENANT_DB_CATALOG_TABLE")]
    pub catalog_table: String,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "TENANT_DB_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TENANT_DB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "TENANT_DB_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Connection parameters of the master database.
    pub fn master_config(&self) -> DbResult<TenantConfig> {
        TenantConfig::from_url(&self.master_url)
    }

    /// Runtime switches for the resolver and executor.
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            multi_tenant: self.multi_tenant,
            strict_tenancy: self.strict_tenancy,
            catalog_table: self.catalog_table.clone(),
            query_timeout: Duration::from_secs(self.query_timeout),
        }
    }
}
