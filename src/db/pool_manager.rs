//! Connection pool registry.
//!
//! One pool exists per distinct [`PoolKey`], created lazily on first use and
//! reused afterwards, plus a dedicated pool for the master database that holds
//! the tenant catalog.
//!
//! # Design Decisions
//!
//! - **`OnceCell` per pool key**: Single-flight pool creation; concurrent
//!   requests for the same tenant wait for the first creation to finish
//! - **Failed creation leaves the cell empty**: the next request retries, and
//!   other tenants' pools are unaffected
//! - **Explicit instance**: the manager is owned by the application and shared
//!   through `Arc`; there is no process-global registry
//!
//! # Concurrency Safety
//!
//! - The registry lock is only held to look up or insert a cell, never across
//!   pool creation or any other await point
//! - Lock acquisition order is consistent: read lock first, write lock with a
//!   double-check on miss
//! - `close_all` drains the registry under the lock and closes pools outside it

use crate::db::pool::{DbPool, PooledConnection};
use crate::error::{DbError, DbResult};
use crate::models::{PoolKey, TenantConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock as TokioRwLock};
use tracing::{debug, info};

/// Registry of live connection pools.
pub struct PoolManager {
    master_config: TenantConfig,
    master: OnceCell<Arc<DbPool>>,
    /// Per-key lazy pools. OnceCell ensures single-flight creation.
    pools: TokioRwLock<HashMap<PoolKey, Arc<OnceCell<Arc<DbPool>>>>>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("master_config", &self.master_config)
            .field("master_initialized", &self.master.initialized())
            .finish_non_exhaustive()
    }
}

impl PoolManager {
    /// Create a manager. No connection is opened until a pool is requested.
    pub fn new(master_config: TenantConfig) -> Self {
        Self {
            master_config,
            master: OnceCell::new(),
            pools: TokioRwLock::new(HashMap::new()),
        }
    }

    /// Connection parameters of the master database.
    pub fn master_config(&self) -> &TenantConfig {
        &self.master_config
    }

    /// Get or create the pool for `key`.
    ///
    /// Calls with an equal key return the same pool object.
    pub async fn get_pool(&self, key: &PoolKey, config: &TenantConfig) -> DbResult<Arc<DbPool>> {
        let cell = {
            let pools = self.pools.read().await;
            if let Some(cell) = pools.get(key) {
                Arc::clone(cell)
            } else {
                drop(pools);
                let mut pools = self.pools.write().await;
                // Double-check after acquiring write lock
                if let Some(cell) = pools.get(key) {
                    Arc::clone(cell)
                } else {
                    let cell = Arc::new(OnceCell::new());
                    pools.insert(key.clone(), Arc::clone(&cell));
                    cell
                }
            }
        };

        let pool = cell
            .get_or_try_init(|| async {
                info!(
                    tenant_id = %key.tenant_id,
                    driver = %key.driver,
                    database = %key.database,
                    "Creating tenant connection pool"
                );
                let pool = DbPool::connect(config).await?;
                Ok::<_, DbError>(Arc::new(pool))
            })
            .await?;

        debug!(pool_key = %key, "Returning tenant pool");
        Ok(Arc::clone(pool))
    }

    /// Lease a connection from the pool for `key`, creating the pool if needed.
    pub async fn get_connection(
        &self,
        key: &PoolKey,
        config: &TenantConfig,
    ) -> DbResult<PooledConnection> {
        let pool = self.get_pool(key, config).await?;
        pool.acquire().await
    }

    /// Get or create the master (catalog) pool.
    pub async fn master_pool(&self) -> DbResult<Arc<DbPool>> {
        let pool = self
            .master
            .get_or_try_init(|| async {
                info!(
                    driver = %self.master_config.driver,
                    database = %self.master_config.database,
                    "Creating master connection pool"
                );
                let pool = DbPool::connect(&self.master_config).await?;
                Ok::<_, DbError>(Arc::new(pool))
            })
            .await?;
        Ok(Arc::clone(pool))
    }

    /// Lease a connection to the master database.
    pub async fn master_connection(&self) -> DbResult<PooledConnection> {
        self.master_pool().await?.acquire().await
    }

    /// Get the number of initialized tenant pools.
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.values().filter(|cell| cell.initialized()).count()
    }

    /// Close every tenant pool and the master pool.
    ///
    /// Safe to call when no pool was ever created, and more than once.
    pub async fn close_all(&self) {
        // Drain pools under lock, close outside lock
        let pools_to_close: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        }; // Lock released here

        for (key, cell) in pools_to_close {
            if let Some(pool) = cell.get() {
                info!(pool_key = %key, "Closing tenant pool");
                pool.close().await;
            }
        }

        if let Some(master) = self.master.get() {
            info!("Closing master pool");
            master.close().await;
        }
    }
}
