//! Query execution engine.
//!
//! This module is the single entry point callers use to talk to a tenant
//! database:
//! - Parameterized queries with a per-call timeout
//! - Transactions scoped to a callback (commit on success, rollback on error)
//! - Deadlock-aware transaction retry
//! - Health checks
//!
//! Every call names its tenant explicitly; the executor resolves the tenant,
//! leases a connection from the tenant's pool and always hands it back.

use crate::config::ExecutorSettings;
use crate::db::pool::PooledConnection;
use crate::db::pool_manager::PoolManager;
use crate::db::resolver::{ResolvedTenant, TenantResolver};
use crate::db::retry::{RetryPolicy, retry_on_deadlock};
use crate::error::{DbError, DbResult, sql_preview};
use crate::models::{DriverKind, QueryParam, QueryResult};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Result of a tenant health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub tenant_id: String,
    pub driver: DriverKind,
    pub database: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An open transaction on a tenant database.
///
/// Handed to [`QueryExecutor::with_transaction`] callbacks; the executor owns
/// commit and rollback.
pub struct Transaction {
    tenant_id: String,
    driver: DriverKind,
    database: String,
    conn: PooledConnection,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("tenant_id", &self.tenant_id)
            .field("driver", &self.driver)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn driver(&self) -> DriverKind {
        self.driver
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Execute a parameterized statement inside the transaction.
    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        ensure_sql(sql)?;
        debug!(
            tenant_id = %self.tenant_id,
            sql = %sql_preview(sql),
            params = params.len(),
            "Executing query in transaction"
        );
        self.conn
            .query(sql, params)
            .await
            .map_err(|e| DbError::query_failed(&self.database, sql, e))
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        Ok(self.query(sql, params).await?.row_count)
    }

    /// Execute SQL text without parameters (DDL).
    pub async fn execute_raw(&mut self, sql: &str) -> DbResult<u64> {
        ensure_sql(sql)?;
        self.conn
            .execute_raw(sql)
            .await
            .map_err(|e| DbError::query_failed(&self.database, sql, e))
    }
}

fn ensure_sql(sql: &str) -> DbResult<()> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_query("SQL cannot be empty"));
    }
    Ok(())
}

/// Open a transaction on a leased connection, run `callback`, then commit or
/// roll back.
pub(crate) async fn run_transaction<T, F>(
    tenant_id: &str,
    driver: DriverKind,
    database: String,
    mut conn: PooledConnection,
    callback: F,
) -> DbResult<T>
where
    F: for<'c> FnOnce(&'c mut Transaction) -> BoxFuture<'c, DbResult<T>>,
{
    conn.begin()
        .await
        .map_err(|e| DbError::query_failed(&database, driver.begin_statement(), e))?;
    debug!(tenant_id = %tenant_id, database = %database, "Transaction started");

    let mut tx = Transaction {
        tenant_id: tenant_id.to_string(),
        driver,
        database,
        conn,
    };

    match callback(&mut tx).await {
        Ok(value) => match tx.conn.commit().await {
            Ok(()) => {
                debug!(tenant_id = %tenant_id, "Transaction committed");
                tx.conn.release();
                Ok(value)
            }
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    database = %tx.database,
                    error = %e,
                    "Commit failed, discarding connection"
                );
                let Transaction { database, conn, .. } = tx;
                conn.discard();
                Err(DbError::query_failed(&database, "COMMIT", e))
            }
        },
        Err(err) => {
            match tx.conn.rollback().await {
                Ok(()) => {
                    debug!(tenant_id = %tenant_id, error = %err, "Transaction rolled back");
                    tx.conn.release();
                }
                Err(rollback_err) => {
                    error!(
                        tenant_id = %tenant_id,
                        database = %tx.database,
                        error = %rollback_err,
                        "Rollback failed, discarding connection"
                    );
                    tx.conn.discard();
                }
            }
            Err(err)
        }
    }
}

/// Query executor that routes every call to the tenant's database.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pools: Arc<PoolManager>,
    resolver: TenantResolver,
}

impl QueryExecutor {
    pub fn new(pools: Arc<PoolManager>, settings: ExecutorSettings) -> Self {
        let resolver = TenantResolver::new(Arc::clone(&pools), settings);
        Self { pools, resolver }
    }

    pub fn pools(&self) -> &Arc<PoolManager> {
        &self.pools
    }

    pub fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Resolve a tenant and lease a connection from its pool.
    async fn connect(&self, tenant_id: &str) -> DbResult<(ResolvedTenant, PooledConnection)> {
        let tenant = self.resolver.resolve(tenant_id).await?;
        let conn = self
            .pools
            .get_connection(&tenant.pool_key, &tenant.config)
            .await?;
        Ok((tenant, conn))
    }

    /// Execute a parameterized statement with the configured default timeout.
    pub async fn query(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryResult> {
        let query_timeout = self.resolver.settings().query_timeout;
        self.query_with_timeout(tenant_id, sql, params, query_timeout)
            .await
    }

    /// Execute a parameterized statement, cancelling it after `query_timeout`.
    ///
    /// A connection whose statement was cancelled is closed rather than reused.
    pub async fn query_with_timeout(
        &self,
        tenant_id: &str,
        sql: &str,
        params: &[QueryParam],
        query_timeout: Duration,
    ) -> DbResult<QueryResult> {
        ensure_sql(sql)?;
        let (tenant, mut conn) = self.connect(tenant_id).await?;
        let database = &tenant.config.database;

        debug!(
            tenant_id = %tenant_id,
            database = %database,
            sql = %sql_preview(sql),
            params = params.len(),
            timeout_ms = query_timeout.as_millis() as u64,
            "Executing query"
        );

        let outcome = timeout(query_timeout, conn.query(sql, params)).await;
        match outcome {
            Ok(result) => {
                conn.release();
                result.map_err(|e| DbError::query_failed(database, sql, e))
            }
            Err(_) => {
                warn!(
                    tenant_id = %tenant_id,
                    database = %database,
                    timeout_ms = query_timeout.as_millis() as u64,
                    "Query timed out"
                );
                conn.discard();
                Err(DbError::query_failed(
                    database,
                    sql,
                    DbError::timeout("query", query_timeout),
                ))
            }
        }
    }

    /// Run `callback` inside a transaction on the tenant's database.
    ///
    /// The transaction is committed when the callback returns `Ok` and rolled
    /// back when it returns `Err`. A failed rollback is logged and the
    /// connection is closed; the callback's error is what the caller sees.
    ///
    /// The callback's future may only borrow the transaction, so anything else
    /// it needs must be moved in.
    pub async fn with_transaction<T, F>(&self, tenant_id: &str, callback: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction) -> BoxFuture<'c, DbResult<T>>,
    {
        let (tenant, conn) = self.connect(tenant_id).await?;
        run_transaction(
            tenant_id,
            tenant.config.driver,
            tenant.config.database,
            conn,
            callback,
        )
        .await
    }

    /// [`with_transaction`](Self::with_transaction), retried on deadlock-class
    /// errors according to `policy`.
    pub async fn with_transaction_retry<T, F>(
        &self,
        tenant_id: &str,
        policy: &RetryPolicy,
        callback: F,
    ) -> DbResult<T>
    where
        F: for<'c> Fn(&'c mut Transaction) -> BoxFuture<'c, DbResult<T>>,
    {
        retry_on_deadlock(policy, |attempt| {
            if attempt > 1 {
                debug!(tenant_id = %tenant_id, attempt, "Retrying transaction");
            }
            self.with_transaction(tenant_id, &callback)
        })
        .await
    }

    /// Check that the tenant's database answers.
    ///
    /// Resolution failures are returned as errors; an unreachable database is
    /// reported as unhealthy.
    pub async fn health_check(&self, tenant_id: &str) -> DbResult<HealthStatus> {
        let tenant = self.resolver.resolve(tenant_id).await?;
        let start = Instant::now();

        let outcome = async {
            let mut conn = self
                .pools
                .get_connection(&tenant.pool_key, &tenant.config)
                .await?;
            let ping = conn.ping().await;
            conn.release();
            ping
        }
        .await;

        let latency_ms = start.elapsed().as_millis() as u64;
        if let Err(e) = &outcome {
            warn!(
                tenant_id = %tenant_id,
                database = %tenant.config.database,
                error = %e,
                "Health check failed"
            );
        }

        Ok(HealthStatus {
            tenant_id: tenant_id.to_string(),
            driver: tenant.config.driver,
            database: tenant.config.database,
            healthy: outcome.is_ok(),
            latency_ms,
            error: outcome.err().map(|e| e.to_string()),
        })
    }

    /// Close every pool owned by the executor's manager.
    pub async fn close(&self) {
        self.pools.close_all().await;
    }
}
