//! Data models for tenant-db.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod tenant;

// Re-export commonly used types
pub use query::{InsertId, JsonRow, QueryParam, QueryResult};
pub use tenant::{DriverKind, PoolKey, PoolTimeouts, SslSetting, TenantConfig};
