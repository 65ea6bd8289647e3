//! Driver adapter.
//!
//! This module wraps the database-specific pools (MySqlPool, PgPool, SqlitePool)
//! behind one enum so the rest of the crate never touches a driver type, and
//! hands out leased connections that normalize every result into
//! [`QueryResult`].

use crate::db::params::{bind_mysql, bind_postgres, bind_sqlite};
use crate::db::sql;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    DriverKind, InsertId, JsonRow, PoolTimeouts, QueryParam, QueryResult, SslSetting,
    TenantConfig,
};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool};
use tracing::{debug, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Open a pool for the given configuration.
    ///
    /// One connection is established eagerly so that bad credentials or an
    /// unreachable host surface here rather than on first use.
    pub async fn connect(config: &TenantConfig) -> DbResult<Self> {
        let opts = &config.pool_options;
        let timeouts = PoolTimeouts::from(opts);
        let max_connections = opts.connection_limit_or_default();

        debug!(
            driver = %config.driver,
            database = %config.database,
            max_connections,
            "Opening connection pool"
        );

        let pool = match config.driver {
            DriverKind::MySql | DriverKind::MariaDb => {
                let mut options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .database(&config.database)
                    .charset(opts.charset_or_default())
                    .ssl_mode(mysql_ssl_mode(&config.ssl));
                if let Some(port) = config.port_or_default() {
                    options = options.port(port);
                }
                if let Some(user) = &config.user {
                    options = options.username(user);
                }
                if let Some(password) = &config.password {
                    options = options.password(password);
                }
                if let Some(ca) = config.ssl.ca_path() {
                    options = options.ssl_ca(ca);
                }

                let pool = MySqlPoolOptions::new()
                    .min_connections(0)
                    .max_connections(max_connections)
                    .acquire_timeout(timeouts.acquire)
                    .idle_timeout(Some(timeouts.idle))
                    .test_before_acquire(opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(config, e))?;
                DbPool::MySql(pool)
            }
            DriverKind::Postgres => {
                let mut options = PgConnectOptions::new()
                    .host(&config.host)
                    .database(&config.database)
                    .ssl_mode(pg_ssl_mode(&config.ssl));
                if let Some(port) = config.port_or_default() {
                    options = options.port(port);
                }
                if let Some(user) = &config.user {
                    options = options.username(user);
                }
                if let Some(password) = &config.password {
                    options = options.password(password);
                }
                if let Some(ca) = config.ssl.ca_path() {
                    options = options.ssl_root_cert(ca);
                }

                let pool = PgPoolOptions::new()
                    .min_connections(0)
                    .max_connections(max_connections)
                    .acquire_timeout(timeouts.acquire)
                    .idle_timeout(Some(timeouts.idle))
                    .test_before_acquire(opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(config, e))?;
                DbPool::Postgres(pool)
            }
            DriverKind::Sqlite => {
                let options = SqliteConnectOptions::new()
                    .filename(&config.database)
                    .create_if_missing(true);

                let pool = SqlitePoolOptions::new()
                    .min_connections(0)
                    .max_connections(max_connections)
                    .acquire_timeout(timeouts.acquire)
                    .idle_timeout(Some(timeouts.idle))
                    .test_before_acquire(opts.test_before_acquire_or_default())
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(config, e))?;
                DbPool::Sqlite(pool)
            }
        };
        Ok(pool)
    }

    /// Lease a connection from the pool.
    ///
    /// Exhaustion past the acquire timeout surfaces as `ConnectionLimitReached`.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        let inner = match self {
            DbPool::MySql(pool) => ConnectionInner::MySql(pool.acquire().await?),
            DbPool::Postgres(pool) => ConnectionInner::Postgres(pool.acquire().await?),
            DbPool::Sqlite(pool) => ConnectionInner::Sqlite(pool.acquire().await?),
        };
        Ok(PooledConnection {
            inner,
            in_transaction: false,
        })
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, pool => pool.close().await)
    }

    /// Check whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(DbPool, self, pool => pool.is_closed())
    }

    /// Number of connections currently open, idle or leased.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(DbPool, self, pool => pool.size())
    }
}

fn mysql_ssl_mode(ssl: &SslSetting) -> MySqlSslMode {
    match ssl {
        SslSetting::Disabled => MySqlSslMode::Disabled,
        SslSetting::Enabled => MySqlSslMode::Required,
        SslSetting::Custom(_) if ssl.verify_certificate() && ssl.ca_path().is_some() => {
            MySqlSslMode::VerifyCa
        }
        SslSetting::Custom(_) => MySqlSslMode::Required,
    }
}

fn pg_ssl_mode(ssl: &SslSetting) -> PgSslMode {
    match ssl {
        SslSetting::Disabled => PgSslMode::Disable,
        SslSetting::Enabled => PgSslMode::Require,
        SslSetting::Custom(_) if ssl.verify_certificate() && ssl.ca_path().is_some() => {
            PgSslMode::VerifyCa
        }
        SslSetting::Custom(_) => PgSslMode::Require,
    }
}

/// Map a pool creation failure, keeping limit errors distinguishable.
fn connect_error(config: &TenantConfig, error: sqlx::Error) -> DbError {
    match DbError::from(error) {
        err @ DbError::ConnectionLimitReached { .. } => err,
        other => DbError::connection(
            format!(
                "Failed to connect to {} database '{}': {}",
                config.driver, config.database, other
            ),
            connection_suggestion(config.driver, &other.to_string()),
        ),
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(driver: DriverKind, error: &str) -> String {
    let error_str = error.to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", driver);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the tenant's database user and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the tenant database has been created".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check the tenant's SSL setting and certificates".to_string();
    }

    match driver {
        DriverKind::Sqlite => "Verify the database file path is writable".to_string(),
        _ => "Verify the host, port and database name in the tenant catalog".to_string(),
    }
}

enum ConnectionInner {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    Sqlite(PoolConnection<Sqlite>),
}

/// A connection leased from a [`DbPool`].
///
/// The lease ends when the handle is consumed by [`release`](Self::release) or
/// dropped; either way the connection goes back to its pool exactly once. A
/// handle dropped while a transaction it opened is still pending is closed
/// instead, so the open transaction can never leak into another lease.
pub struct PooledConnection {
    inner: ConnectionInner,
    in_transaction: bool,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("driver", &self.driver())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl PooledConnection {
    /// Driver family of this connection. MariaDB reports as MySQL.
    pub fn driver(&self) -> DriverKind {
        match self.inner {
            ConnectionInner::MySql(_) => DriverKind::MySql,
            ConnectionInner::Postgres(_) => DriverKind::Postgres,
            ConnectionInner::Sqlite(_) => DriverKind::Sqlite,
        }
    }

    /// True while a transaction opened through [`begin`](Self::begin) is pending.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Execute a parameterized statement and normalize its result.
    ///
    /// `?` placeholders are rewritten for PostgreSQL.
    pub async fn query(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let returns_rows = sql::returns_rows(sql);
        let is_insert = sql::is_insert(sql);

        match &mut self.inner {
            ConnectionInner::MySql(conn) => {
                let query = bind_mysql(sqlx::query(sql), params);
                if returns_rows {
                    let rows = query.fetch_all(&mut **conn).await?;
                    Ok(rows_result(rows.iter().map(RowToJson::to_json_map).collect(), false))
                } else {
                    let done = query.execute(&mut **conn).await?;
                    let insert_id = (is_insert && done.last_insert_id() > 0)
                        .then(|| InsertId::Int(done.last_insert_id() as i64));
                    Ok(affected_result(done.rows_affected(), insert_id))
                }
            }
            ConnectionInner::Postgres(conn) => {
                let rewritten = sql::rewrite_placeholders(sql);
                let query = bind_postgres(sqlx::query(&rewritten), params);
                if returns_rows {
                    let rows = query.fetch_all(&mut **conn).await?;
                    Ok(rows_result(
                        rows.iter().map(RowToJson::to_json_map).collect(),
                        is_insert,
                    ))
                } else {
                    let done = query.execute(&mut **conn).await?;
                    Ok(affected_result(done.rows_affected(), None))
                }
            }
            ConnectionInner::Sqlite(conn) => {
                let query = bind_sqlite(sqlx::query(sql), params);
                if returns_rows {
                    let rows = query.fetch_all(&mut **conn).await?;
                    Ok(rows_result(
                        rows.iter().map(RowToJson::to_json_map).collect(),
                        is_insert,
                    ))
                } else {
                    let done = query.execute(&mut **conn).await?;
                    let insert_id = (is_insert && done.rows_affected() > 0)
                        .then(|| InsertId::Int(done.last_insert_rowid()));
                    Ok(affected_result(done.rows_affected(), insert_id))
                }
            }
        }
    }

    /// Execute SQL text without parameters.
    ///
    /// Used for transaction control and DDL. No arguments are bound, so the
    /// drivers send the text unprepared.
    pub async fn execute_raw(&mut self, sql: &str) -> DbResult<u64> {
        let affected = match &mut self.inner {
            ConnectionInner::MySql(conn) => {
                sqlx::Executor::execute(&mut **conn, sql).await?.rows_affected()
            }
            ConnectionInner::Postgres(conn) => {
                sqlx::Executor::execute(&mut **conn, sql).await?.rows_affected()
            }
            ConnectionInner::Sqlite(conn) => {
                sqlx::Executor::execute(&mut **conn, sql).await?.rows_affected()
            }
        };
        Ok(affected)
    }

    /// Round-trip to the server to confirm the connection is alive.
    pub async fn ping(&mut self) -> DbResult<()> {
        impl_db_dispatch!(ConnectionInner, &mut self.inner, conn => conn.ping().await?);
        Ok(())
    }

    /// Open a transaction with the driver's native statement.
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::internal("A transaction is already open on this connection"));
        }
        let statement = self.driver().begin_statement();
        self.execute_raw(statement).await?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the open transaction.
    ///
    /// On failure the connection stays marked as in a transaction and will be
    /// discarded when dropped.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.execute_raw("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.execute_raw("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Return the connection to its pool.
    pub fn release(self) {
        drop(self);
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.mark_close_on_drop();
        self.in_transaction = false;
    }

    fn mark_close_on_drop(&mut self) {
        impl_db_dispatch!(ConnectionInner, &mut self.inner, conn => conn.close_on_drop())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.in_transaction {
            warn!(
                driver = %self.driver(),
                "Connection dropped with an open transaction; closing it instead of returning it to the pool"
            );
            self.mark_close_on_drop();
        }
    }
}

fn rows_result(rows: Vec<JsonRow>, is_insert: bool) -> QueryResult {
    // INSERT ... RETURNING id carries the generated key in the first row
    let insert_id = if is_insert {
        rows.first().and_then(|row| match row.get("id") {
            Some(JsonValue::Number(n)) => n.as_i64().map(InsertId::Int),
            Some(JsonValue::String(s)) => Some(InsertId::Text(s.clone())),
            _ => None,
        })
    } else {
        None
    };
    QueryResult {
        row_count: rows.len() as u64,
        rows,
        insert_id,
    }
}

fn affected_result(rows_affected: u64, insert_id: Option<InsertId>) -> QueryResult {
    QueryResult {
        rows: Vec::new(),
        row_count: rows_affected,
        insert_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn sqlite_pool() -> DbPool {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        DbPool::connect(&TenantConfig::sqlite(path.to_string_lossy()))
            .await
            .unwrap()
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(pg_ssl_mode(&SslSetting::Disabled), PgSslMode::Disable));
        assert!(matches!(pg_ssl_mode(&SslSetting::Enabled), PgSslMode::Require));
        let custom = SslSetting::Custom(serde_json::json!({"ca": "/ca.pem"}));
        assert!(matches!(pg_ssl_mode(&custom), PgSslMode::VerifyCa));
        let lax = SslSetting::Custom(
            serde_json::json!({"ca": "/ca.pem", "rejectUnauthorized": false}),
        );
        assert!(matches!(pg_ssl_mode(&lax), PgSslMode::Require));
        assert!(matches!(mysql_ssl_mode(&SslSetting::Enabled), MySqlSslMode::Required));
    }

    #[test]
    fn test_rows_result_takes_returning_id() {
        let mut row = JsonRow::new();
        row.insert("id".into(), serde_json::json!(12));
        let result = rows_result(vec![row], true);
        assert_eq!(result.insert_id, Some(InsertId::Int(12)));
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_sqlite_query_normalizes_results() {
        let pool = sqlite_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        conn.execute_raw(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL)",
        )
        .await
        .unwrap();

        let inserted = conn
            .query("INSERT INTO notes (body) VALUES (?)", &params!["first"])
            .await
            .unwrap();
        assert_eq!(inserted.row_count, 1);
        assert_eq!(inserted.insert_id, Some(InsertId::Int(1)));

        let updated = conn
            .query("UPDATE notes SET body = ? WHERE id = ?", &params!["edited", 1])
            .await
            .unwrap();
        assert_eq!(updated.row_count, 1);
        assert!(updated.insert_id.is_none());

        let selected = conn.query("SELECT id, body FROM notes", &[]).await.unwrap();
        assert_eq!(selected.row_count, 1);
        assert_eq!(selected.scalar("body"), Some(&serde_json::json!("edited")));

        conn.release();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_ping_and_transaction_flags() {
        let pool = sqlite_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        conn.ping().await.unwrap();

        conn.begin().await.unwrap();
        assert!(conn.in_transaction());
        assert!(conn.begin().await.is_err());
        conn.rollback().await.unwrap();
        assert!(!conn.in_transaction());
        conn.release();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_drop_mid_transaction_closes_connection() {
        let pool = sqlite_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        conn.execute_raw("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
            .await
            .unwrap();

        conn.begin().await.unwrap();
        conn.query("INSERT INTO notes (body) VALUES (?)", &params!["pending"])
            .await
            .unwrap();
        drop(conn);

        // the single pool slot comes back as a fresh connection with no open transaction
        let mut next = pool.acquire().await.unwrap();
        assert!(!next.in_transaction());
        next.begin().await.unwrap();
        let rows = next.query("SELECT body FROM notes", &[]).await.unwrap();
        assert_eq!(rows.row_count, 0);
        next.rollback().await.unwrap();
        next.release();
        pool.close().await;
    }
}
