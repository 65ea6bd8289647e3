//! Error types for the tenant database layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver-specific failures are classified into a small taxonomy so callers can react
//! to deadlocks, exhausted pools and missing tenants without inspecting driver codes.

use sqlx::error::DatabaseError;
use sqlx::mysql::MySqlDatabaseError;
use sqlx::sqlite::SqliteError;
use thiserror::Error;

/// Maximum number of SQL characters carried in error messages and logs.
pub const SQL_PREVIEW_CHARS: usize = 50;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Tenant not found: {tenant_id}")]
    TenantNotFound { tenant_id: String },

    #[error(
        "Unsupported database driver: '{driver}'. Supported drivers: postgres, mysql, mariadb, sqlite"
    )]
    UnsupportedDriver { driver: String },

    #[error("Connection limit reached: {message}")]
    ConnectionLimitReached { message: String },

    #[error("Deadlock detected: {message}")]
    DeadlockDetected {
        message: String,
        /// e.g., "40P01" for PostgreSQL deadlocks
        sql_state: Option<String>,
    },

    #[error("Migration '{migration}' failed: {source}")]
    MigrationFailed {
        migration: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Seeder '{seeder}' failed: {source}")]
    SeedFailed {
        seeder: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Schema validation failed for '{identifier}': {reason}")]
    SchemaValidation { identifier: String, reason: String },

    #[error("No column defined: '{modifier}' must follow a column declaration")]
    NoColumnDefined { modifier: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Query failed on database '{database}' [{sql_preview}]: {source}")]
    QueryFailed {
        database: String,
        sql_preview: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout {
        operation: String,
        elapsed_ms: u64,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a tenant not found error.
    pub fn tenant_not_found(tenant_id: impl Into<String>) -> Self {
        Self::TenantNotFound {
            tenant_id: tenant_id.into(),
        }
    }

    /// Create an unsupported driver error.
    pub fn unsupported_driver(driver: impl Into<String>) -> Self {
        Self::UnsupportedDriver {
            driver: driver.into(),
        }
    }

    /// Create a connection limit error.
    pub fn connection_limit(message: impl Into<String>) -> Self {
        Self::ConnectionLimitReached {
            message: message.into(),
        }
    }

    /// Create a deadlock error with optional SQL state.
    pub fn deadlock(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::DeadlockDetected {
            message: message.into(),
            sql_state,
        }
    }

    /// Wrap an error raised while applying or reverting a migration.
    pub fn migration_failed(migration: impl Into<String>, source: DbError) -> Self {
        Self::MigrationFailed {
            migration: migration.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error raised while running a seeder.
    pub fn seed_failed(seeder: impl Into<String>, source: DbError) -> Self {
        Self::SeedFailed {
            seeder: seeder.into(),
            source: Box::new(source),
        }
    }

    /// Create a schema validation error.
    pub fn schema_validation(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a no column defined error.
    pub fn no_column_defined(modifier: impl Into<String>) -> Self {
        Self::NoColumnDefined {
            modifier: modifier.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Wrap a failed statement with its target database and a truncated SQL prefix.
    ///
    /// Parameter values are never part of the wrapped message.
    pub fn query_failed(database: impl Into<String>, sql: &str, source: DbError) -> Self {
        Self::QueryFailed {
            database: database.into(),
            sql_preview: sql_preview(sql),
            source: Box::new(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Follow `QueryFailed` wrappers down to the error that triggered them.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::QueryFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self.root_cause() {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::DeadlockDetected { .. } => Some("Retry the transaction"),
            Self::ConnectionLimitReached { .. } => {
                Some("Raise connection_limit for the tenant or reduce concurrent work")
            }
            _ => None,
        }
    }

    /// Check if this error reports transaction contention that warrants a retry.
    pub fn is_deadlock(&self) -> bool {
        matches!(self.root_cause(), Self::DeadlockDetected { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Connection { .. } | Self::Timeout { .. } | Self::DeadlockDetected { .. }
        )
    }

    /// Check if this error was caused by a table that does not exist.
    pub fn is_missing_table(&self) -> bool {
        match self.root_cause() {
            Self::Database {
                message, sql_state, ..
            } => {
                matches!(sql_state.as_deref(), Some("42P01") | Some("42S02"))
                    || message.contains("no such table")
                    || message.contains("doesn't exist")
            }
            _ => false,
        }
    }
}

/// Truncate SQL for error messages and logs.
pub fn sql_preview(sql: &str) -> String {
    let trimmed = sql.trim();
    let mut preview: String = trimmed.chars().take(SQL_PREVIEW_CHARS).collect();
    if trimmed.chars().count() > SQL_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

/// Classify a driver-reported error into the taxonomy.
fn classify_database_error(db_err: &dyn DatabaseError) -> DbError {
    let message = db_err.message().to_string();
    let code = db_err.code().map(|c| c.to_string());
    let mysql_number = db_err
        .try_downcast_ref::<MySqlDatabaseError>()
        .map(|e| e.number());
    let is_sqlite = db_err.try_downcast_ref::<SqliteError>().is_some();

    let deadlock = match (mysql_number, is_sqlite) {
        // ER_LOCK_DEADLOCK, ER_LOCK_WAIT_TIMEOUT
        (Some(1213) | Some(1205), _) => true,
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
        (_, true) => matches!(
            code.as_deref(),
            Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
        ),
        _ => matches!(code.as_deref(), Some("40P01") | Some("40001")),
    };
    if deadlock {
        return DbError::deadlock(message, code);
    }

    // ER_CON_COUNT_ERROR, SQLSTATE 08004, PostgreSQL too_many_connections
    if mysql_number == Some(1040) || matches!(code.as_deref(), Some("08004") | Some("53300")) {
        return DbError::connection_limit(message);
    }

    DbError::database(message, code, "Check the SQL syntax and referenced objects")
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the tenant connection parameters and credentials",
            ),
            sqlx::Error::Database(db_err) => classify_database_error(db_err.as_ref()),
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection_limit(
                "Timed out waiting for a pooled connection; every connection is in use",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Check the selected column names",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
