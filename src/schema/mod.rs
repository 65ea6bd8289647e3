//! Schema definition DSL.
//!
//! - `identifier`: allow-list validation for names spliced into SQL
//! - `builder`: fluent `CREATE TABLE` / `DROP TABLE` generation per driver

pub mod builder;
pub mod identifier;

pub use builder::{ColumnDef, ColumnType, DefaultValue, TableBuilder};
pub use identifier::{is_reserved_word, validate_identifier};
