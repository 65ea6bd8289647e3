//! Declarative macros for reducing code duplication.
//!
//! The macros expand at compile time with zero runtime overhead.

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// # Example
///
/// ```ignore
/// executor
///     .query("acme", "SELECT * FROM todos WHERE user_id = ? AND done = ?", &params![7, false])
///     .await?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

/// Macro for generating driver dispatch match arms.
///
/// Generates one arm per `DbPool`/`PooledConnection` variant, binding the inner
/// driver value to the given identifier.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, self, p => p.close().await)
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($ty:ident, $value:expr, $p:ident => $body:expr) => {
        match $value {
            $ty::MySql($p) => $body,
            $ty::Postgres($p) => $body,
            $ty::Sqlite($p) => $body,
        }
    };
}

pub use impl_db_dispatch;
pub use params;
