//! Tenant catalog administration.
//!
//! The catalog is a table in the master database with one row per tenant
//! describing where that tenant's data lives. The resolver only reads it; this
//! module creates the table and maintains its rows.

use crate::db::executor::{Transaction, run_transaction};
use crate::db::pool_manager::PoolManager;
use crate::error::{DbError, DbResult};
use crate::models::{SslSetting, TenantConfig};
use crate::schema::{TableBuilder, validate_identifier};
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

/// Label used in logs for work on the master database.
const MASTER_SCOPE: &str = "master";

/// Administrative access to the tenant catalog table.
#[derive(Debug, Clone)]
pub struct TenantCatalog {
    pools: Arc<PoolManager>,
    table: String,
}

impl TenantCatalog {
    pub fn new(pools: Arc<PoolManager>, table: impl Into<String>) -> DbResult<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self { pools, table })
    }

    /// Table definition of the catalog.
    pub fn definition(&self) -> DbResult<TableBuilder> {
        let mut table = TableBuilder::new(&self.table)?;
        table.id();
        table.string_len("tenant_id", 64)?.unique()?;
        table.string_len("db_driver", 16)?;
        table.string("db_host")?.nullable()?;
        table.integer("db_port")?.nullable()?;
        table.string("db_user")?.nullable()?;
        table.string("db_pass")?.nullable()?;
        table.string("db_name")?;
        table.text("db_ssl")?.nullable()?;
        table.boolean("active")?.default(true)?;
        table.timestamps();
        Ok(table)
    }

    /// Create the catalog table if it does not exist.
    pub async fn install(&self) -> DbResult<()> {
        let definition = self.definition()?;
        let mut conn = self.pools.master_connection().await?;
        let driver = self.pools.master_config().driver;
        for statement in definition.create_statements(driver)? {
            if let Err(e) = conn.execute_raw(&statement).await {
                conn.release();
                return Err(DbError::query_failed(
                    &self.pools.master_config().database,
                    &statement,
                    e,
                ));
            }
        }
        conn.release();
        info!(table = %self.table, "Tenant catalog installed");
        Ok(())
    }

    /// Insert or replace the catalog row for a tenant and mark it active.
    pub async fn register(&self, tenant_id: &str, config: &TenantConfig) -> DbResult<()> {
        if tenant_id.trim().is_empty() {
            return Err(DbError::invalid_query("Tenant id cannot be empty"));
        }

        let ssl = match &config.ssl {
            SslSetting::Disabled => None,
            SslSetting::Enabled => Some("true".to_string()),
            SslSetting::Custom(obj) => Some(obj.to_string()),
        };
        let row = params![
            tenant_id,
            config.driver.as_str(),
            Some(config.host.as_str()).filter(|h| !h.is_empty()),
            config.port.map(i64::from),
            config.user.as_deref(),
            config.password.as_deref(),
            config.database.as_str(),
            ssl,
            true,
        ];
        let delete = format!("DELETE FROM {} WHERE tenant_id = ?", self.table);
        let insert = format!(
            "INSERT INTO {} (tenant_id, db_driver, db_host, db_port, db_user, db_pass, \
             db_name, db_ssl, active) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );
        let key = params![tenant_id];

        self.in_master_transaction(move |tx| {
            Box::pin(async move {
                tx.execute(&delete, &key).await?;
                tx.execute(&insert, &row).await?;
                Ok(())
            })
        })
        .await?;

        info!(
            tenant_id = %tenant_id,
            driver = %config.driver,
            database = %config.database,
            "Tenant registered"
        );
        Ok(())
    }

    /// Mark a tenant inactive. Returns whether a row was changed.
    pub async fn deactivate(&self, tenant_id: &str) -> DbResult<bool> {
        let sql = format!("UPDATE {} SET active = ? WHERE tenant_id = ?", self.table);
        let values = params![false, tenant_id];
        let changed = self
            .in_master_transaction(move |tx| {
                Box::pin(async move { tx.execute(&sql, &values).await })
            })
            .await?;
        info!(tenant_id = %tenant_id, changed, "Tenant deactivated");
        Ok(changed > 0)
    }

    /// List the ids of active tenants.
    pub async fn active_tenants(&self) -> DbResult<Vec<String>> {
        let sql = format!(
            "SELECT tenant_id FROM {} WHERE active = ? ORDER BY tenant_id",
            self.table
        );
        let mut conn = self.pools.master_connection().await?;
        let result = conn.query(&sql, &params![true]).await;
        conn.release();
        let result = result
            .map_err(|e| DbError::query_failed(&self.pools.master_config().database, &sql, e))?;

        Ok(result
            .rows
            .iter()
            .filter_map(|row| match row.get("tenant_id") {
                Some(JsonValue::String(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    /// Run a unit of work in a transaction on the master database.
    async fn in_master_transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction) -> BoxFuture<'c, DbResult<T>>,
    {
        let master = self.pools.master_config();
        let conn = self.pools.master_connection().await?;
        run_transaction(MASTER_SCOPE, master.driver, master.database.clone(), conn, work).await
    }
}
