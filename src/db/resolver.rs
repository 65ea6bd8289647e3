//! Tenant resolution.
//!
//! Maps a tenant id to the connection parameters of its database, either by
//! reading the tenant catalog in the master database or, with multi-tenancy
//! disabled, by passing every tenant through to the primary database.

use crate::config::ExecutorSettings;
use crate::db::pool_manager::PoolManager;
use crate::error::{DbError, DbResult};
use crate::models::{DriverKind, JsonRow, PoolKey, SslSetting, TenantConfig};
use crate::schema::validate_identifier;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pool key tenant id shared by every tenant served from the primary database.
pub const PRIMARY_TENANT: &str = "primary";

/// Outcome of resolving a tenant id.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTenant {
    /// The tenant id the caller asked for.
    pub tenant_id: String,
    pub pool_key: PoolKey,
    pub config: TenantConfig,
}

impl ResolvedTenant {
    /// True when the tenant is served by the primary database.
    pub fn is_primary(&self) -> bool {
        self.pool_key.tenant_id == PRIMARY_TENANT
    }
}

/// Resolves tenant ids to database configurations.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    pools: Arc<PoolManager>,
    settings: ExecutorSettings,
}

impl TenantResolver {
    pub fn new(pools: Arc<PoolManager>, settings: ExecutorSettings) -> Self {
        Self { pools, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Resolve a tenant id.
    ///
    /// With multi-tenancy disabled this never touches the database. Otherwise
    /// the active catalog row for the tenant is read from the master database;
    /// a missing row is an error in strict mode and falls back to the primary
    /// database otherwise.
    pub async fn resolve(&self, tenant_id: &str) -> DbResult<ResolvedTenant> {
        if tenant_id.trim().is_empty() {
            return Err(DbError::invalid_query("Tenant id cannot be empty"));
        }

        if !self.settings.multi_tenant {
            return Ok(self.primary(tenant_id));
        }

        match self.lookup(tenant_id).await? {
            Some(config) => {
                debug!(
                    tenant_id = %tenant_id,
                    driver = %config.driver,
                    database = %config.database,
                    "Resolved tenant from catalog"
                );
                Ok(ResolvedTenant {
                    tenant_id: tenant_id.to_string(),
                    pool_key: config.pool_key(tenant_id),
                    config,
                })
            }
            None if self.settings.strict_tenancy => Err(DbError::tenant_not_found(tenant_id)),
            None => {
                warn!(
                    tenant_id = %tenant_id,
                    "Tenant not found in catalog, falling back to primary database"
                );
                Ok(self.primary(tenant_id))
            }
        }
    }

    fn primary(&self, tenant_id: &str) -> ResolvedTenant {
        let config = self.pools.master_config().clone();
        ResolvedTenant {
            tenant_id: tenant_id.to_string(),
            pool_key: config.pool_key(PRIMARY_TENANT),
            config,
        }
    }

    async fn lookup(&self, tenant_id: &str) -> DbResult<Option<TenantConfig>> {
        let table = &self.settings.catalog_table;
        validate_identifier(table)?;

        let sql = format!(
            "SELECT db_driver, db_host, db_port, db_user, db_pass, db_name, db_ssl \
             FROM {} WHERE tenant_id = ? AND active = ?",
            table
        );

        let mut conn = self.pools.master_connection().await?;
        let result = conn.query(&sql, &params![tenant_id, true]).await;
        conn.release();

        let result = result.map_err(|e| {
            DbError::query_failed(&self.pools.master_config().database, &sql, e)
        })?;
        result.first().map(config_from_catalog_row).transpose()
    }
}

/// Build a tenant configuration from a catalog row.
pub fn config_from_catalog_row(row: &JsonRow) -> DbResult<TenantConfig> {
    let driver_name = text_field(row, "db_driver")
        .ok_or_else(|| DbError::config("Catalog row is missing db_driver"))?;
    let driver = DriverKind::parse(&driver_name)?;

    let database = text_field(row, "db_name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| DbError::config("Catalog row is missing db_name"))?;
    if driver != DriverKind::Sqlite {
        validate_identifier(&database)?;
    }

    let port = match row.get("db_port") {
        Some(JsonValue::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(
            s.trim()
                .parse::<u16>()
                .map_err(|_| DbError::config(format!("Invalid db_port '{}'", s)))?,
        ),
        _ => None,
    };

    Ok(TenantConfig {
        driver,
        host: text_field(row, "db_host")
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string()),
        port,
        user: text_field(row, "db_user").filter(|u| !u.is_empty()),
        password: text_field(row, "db_pass"),
        database,
        ssl: SslSetting::normalize(row.get("db_ssl"), driver),
        pool_options: Default::default(),
    })
}

fn text_field(row: &JsonRow, column: &str) -> Option<String> {
    match row.get(column)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}
