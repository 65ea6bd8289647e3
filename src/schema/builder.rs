//! Fluent table builder.
//!
//! Column declarations append to an ordered list; modifiers change the most
//! recently declared column. Every identifier is validated as it is added, so
//! a builder that exists can always be rendered to SQL for any driver.

use crate::db::executor::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::DriverKind;
use crate::schema::identifier::validate_identifier;
use tracing::debug;

/// Default length of `string` columns.
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Logical column type, rendered per driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key
    Id,
    String(u32),
    Integer,
    BigInteger,
    Boolean,
    Date,
    DateTime,
    Text,
    Decimal { precision: u8, scale: u8 },
    Json,
}

impl ColumnType {
    /// SQL type for a driver.
    pub fn render(&self, driver: DriverKind) -> String {
        let mysql = driver.is_mysql_family();
        match (self, driver) {
            (Self::Id, DriverKind::Postgres) => "SERIAL PRIMARY KEY".to_string(),
            (Self::Id, DriverKind::Sqlite) => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            (Self::Id, _) => "INT AUTO_INCREMENT PRIMARY KEY".to_string(),
            (Self::String(len), _) => format!("VARCHAR({})", len),
            (Self::Integer, _) if mysql => "INT".to_string(),
            (Self::Integer, _) => "INTEGER".to_string(),
            (Self::BigInteger, DriverKind::Sqlite) => "INTEGER".to_string(),
            (Self::BigInteger, _) => "BIGINT".to_string(),
            (Self::Boolean, _) => "BOOLEAN".to_string(),
            (Self::Date, _) => "DATE".to_string(),
            (Self::DateTime, DriverKind::Postgres) => "TIMESTAMP".to_string(),
            (Self::DateTime, _) => "DATETIME".to_string(),
            (Self::Text, _) => "TEXT".to_string(),
            (Self::Decimal { precision, scale }, _) => {
                format!("DECIMAL({}, {})", precision, scale)
            }
            (Self::Json, DriverKind::Postgres) => "JSONB".to_string(),
            (Self::Json, DriverKind::Sqlite) => "TEXT".to_string(),
            (Self::Json, _) => "JSON".to_string(),
        }
    }
}

/// Column default value.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    CurrentTimestamp,
}

impl DefaultValue {
    fn render(&self, driver: DriverKind) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => match (driver, *b) {
                (DriverKind::Sqlite, true) => "1".to_string(),
                (DriverKind::Sqlite, false) => "0".to_string(),
                (_, true) => "TRUE".to_string(),
                (_, false) => "FALSE".to_string(),
            },
            Self::Int(v) => v.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

impl From<bool> for DefaultValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for DefaultValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for DefaultValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<&str> for DefaultValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// A declared column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    pub indexed: bool,
}

impl ColumnDef {
    fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: false,
            unique: false,
            default: None,
            indexed: false,
        }
    }

    fn render(&self, driver: DriverKind) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.render(driver));
        if self.column_type != ColumnType::Id {
            if !self.nullable {
                sql.push_str(" NOT NULL");
            }
            if self.unique {
                sql.push_str(" UNIQUE");
            }
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.render(driver));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ForeignKey {
    column: String,
    ref_table: String,
    ref_column: String,
}

/// Builder for one `CREATE TABLE` statement and its indexes.
///
/// # Example
///
/// ```ignore
/// let mut table = TableBuilder::new("todos")?;
/// table.id();
/// table.string("title")?;
/// table.boolean("completed")?.default(false)?;
/// table.foreign_key("user_id", "users", "id")?.index()?;
/// table.timestamps();
/// table.execute(tx).await?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TableBuilder {
    table: String,
    columns: Vec<ColumnDef>,
    foreign_keys: Vec<ForeignKey>,
}

impl TableBuilder {
    /// Start a table definition.
    pub fn new(table: &str) -> DbResult<Self> {
        validate_identifier(table)?;
        Ok(Self {
            table: table.to_string(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn push(&mut self, name: &str, column_type: ColumnType) -> DbResult<&mut Self> {
        validate_identifier(name)?;
        if self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(DbError::schema_validation(name, "duplicate column"));
        }
        self.columns.push(ColumnDef::new(name, column_type));
        Ok(self)
    }

    /// Auto-incrementing primary key named `id`.
    pub fn id(&mut self) -> &mut Self {
        if !self.columns.iter().any(|c| c.name == "id") {
            self.columns.push(ColumnDef::new("id", ColumnType::Id));
        }
        self
    }

    pub fn string(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::String(DEFAULT_STRING_LENGTH))
    }

    pub fn string_len(&mut self, name: &str, length: u32) -> DbResult<&mut Self> {
        if length == 0 {
            return Err(DbError::schema_validation(name, "string length must be positive"));
        }
        self.push(name, ColumnType::String(length))
    }

    pub fn integer(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::BigInteger)
    }

    pub fn boolean(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::Boolean)
    }

    pub fn date(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::Date)
    }

    pub fn datetime(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::DateTime)
    }

    pub fn text(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::Text)
    }

    pub fn decimal(&mut self, name: &str, precision: u8, scale: u8) -> DbResult<&mut Self> {
        if precision == 0 || scale > precision {
            return Err(DbError::schema_validation(
                name,
                format!("invalid decimal precision ({}, {})", precision, scale),
            ));
        }
        self.push(name, ColumnType::Decimal { precision, scale })
    }

    pub fn json(&mut self, name: &str) -> DbResult<&mut Self> {
        self.push(name, ColumnType::Json)
    }

    /// `created_at` and `updated_at`, both defaulting to the current time.
    pub fn timestamps(&mut self) -> &mut Self {
        for name in ["created_at", "updated_at"] {
            if !self.columns.iter().any(|c| c.name == name) {
                let mut column = ColumnDef::new(name, ColumnType::DateTime);
                column.default = Some(DefaultValue::CurrentTimestamp);
                self.columns.push(column);
            }
        }
        self
    }

    /// Integer column referencing `ref_table(ref_column)`, deleted with its parent.
    pub fn foreign_key(
        &mut self,
        column: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> DbResult<&mut Self> {
        validate_identifier(ref_table)?;
        validate_identifier(ref_column)?;
        self.push(column, ColumnType::Integer)?;
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            ref_table: ref_table.to_string(),
            ref_column: ref_column.to_string(),
        });
        Ok(self)
    }

    fn last_column(&mut self, modifier: &str) -> DbResult<&mut ColumnDef> {
        self.columns
            .last_mut()
            .ok_or_else(|| DbError::no_column_defined(modifier))
    }

    /// Mark the last column unique.
    pub fn unique(&mut self) -> DbResult<&mut Self> {
        self.last_column("unique")?.unique = true;
        Ok(self)
    }

    /// Allow NULL in the last column.
    pub fn nullable(&mut self) -> DbResult<&mut Self> {
        self.last_column("nullable")?.nullable = true;
        Ok(self)
    }

    /// Set the default of the last column.
    pub fn default(&mut self, value: impl Into<DefaultValue>) -> DbResult<&mut Self> {
        self.last_column("default")?.default = Some(value.into());
        Ok(self)
    }

    /// Index the last column.
    pub fn index(&mut self) -> DbResult<&mut Self> {
        self.last_column("index")?.indexed = true;
        Ok(self)
    }

    fn index_name(&self, column: &str) -> String {
        format!("idx_{}_{}", self.table, column)
    }

    /// Render `CREATE TABLE IF NOT EXISTS` followed by any index statements.
    pub fn create_statements(&self, driver: DriverKind) -> DbResult<Vec<String>> {
        if self.columns.is_empty() {
            return Err(DbError::no_column_defined("create"));
        }

        let mut definitions: Vec<String> =
            self.columns.iter().map(|c| c.render(driver)).collect();
        let indexed: Vec<&ColumnDef> = self.columns.iter().filter(|c| c.indexed).collect();

        if driver.is_mysql_family() {
            for column in &indexed {
                definitions.push(format!(
                    "INDEX {} ({})",
                    self.index_name(&column.name),
                    column.name
                ));
            }
        }
        for fk in &self.foreign_keys {
            definitions.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
                fk.column, fk.ref_table, fk.ref_column
            ));
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            definitions.join(", ")
        )];
        if !driver.is_mysql_family() {
            for column in &indexed {
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    self.index_name(&column.name),
                    self.table,
                    column.name
                ));
            }
        }
        Ok(statements)
    }

    /// Render `DROP TABLE IF EXISTS` for a table.
    pub fn drop_statement(table: &str) -> DbResult<String> {
        validate_identifier(table)?;
        Ok(format!("DROP TABLE IF EXISTS {}", table))
    }

    /// Create the table inside an open transaction.
    pub async fn execute(&self, tx: &mut Transaction) -> DbResult<()> {
        let statements = self.create_statements(tx.driver())?;
        debug!(
            tenant_id = %tx.tenant_id(),
            table = %self.table,
            statements = statements.len(),
            "Creating table"
        );
        for statement in &statements {
            tx.execute_raw(statement).await?;
        }
        Ok(())
    }

    /// Drop a table inside an open transaction.
    pub async fn drop(tx: &mut Transaction, table: &str) -> DbResult<()> {
        let statement = Self::drop_statement(table)?;
        debug!(tenant_id = %tx.tenant_id(), table = %table, "Dropping table");
        tx.execute_raw(&statement).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todos() -> TableBuilder {
        let mut table = TableBuilder::new("todos").unwrap();
        table.id();
        table.string("title").unwrap();
        table.boolean("completed").unwrap().default(false).unwrap();
        table.integer("position").unwrap().index().unwrap();
        table.foreign_key("user_id", "users", "id").unwrap();
        table.timestamps();
        table
    }

    #[test]
    fn test_render_sqlite() {
        let statements = todos().create_statements(DriverKind::Sqlite).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0],
            "CREATE TABLE IF NOT EXISTS todos (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             title VARCHAR(255) NOT NULL, completed BOOLEAN NOT NULL DEFAULT 0, \
             position INTEGER NOT NULL, user_id INTEGER NOT NULL, \
             created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
             FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE)"
        );
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS idx_todos_position ON todos (position)"
        );
    }

    #[test]
    fn test_render_mysql_inline_index() {
        let statements = todos().create_statements(DriverKind::MySql).unwrap();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("id INT AUTO_INCREMENT PRIMARY KEY"));
        assert!(statements[0].contains("completed BOOLEAN NOT NULL DEFAULT FALSE"));
        assert!(statements[0].contains("INDEX idx_todos_position (position)"));
    }

    #[test]
    fn test_render_postgres_types() {
        let mut table = TableBuilder::new("events").unwrap();
        table.id();
        table.json("payload").unwrap().nullable().unwrap();
        table.datetime("occurred_at").unwrap();
        table.decimal("amount", 10, 2).unwrap();
        let sql = &table.create_statements(DriverKind::Postgres).unwrap()[0];
        assert!(sql.contains("id SERIAL PRIMARY KEY"));
        assert!(sql.contains("payload JSONB,") || sql.contains("payload JSONB "));
        assert!(sql.contains("occurred_at TIMESTAMP NOT NULL"));
        assert!(sql.contains("amount DECIMAL(10, 2) NOT NULL"));
    }

    #[test]
    fn test_modifier_before_column_fails() {
        let mut table = TableBuilder::new("users").unwrap();
        assert!(matches!(table.unique(), Err(DbError::NoColumnDefined { .. })));
        assert!(matches!(table.default(1), Err(DbError::NoColumnDefined { .. })));
        assert!(matches!(
            table.create_statements(DriverKind::Sqlite),
            Err(DbError::NoColumnDefined { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        assert!(TableBuilder::new("users; DROP TABLE x").is_err());
        assert!(TableBuilder::new("select").is_err());

        let mut table = TableBuilder::new("users").unwrap();
        assert!(matches!(
            table.string("name;--"),
            Err(DbError::SchemaValidation { .. })
        ));
        assert!(table.string("order").is_err());
        assert!(table.foreign_key("owner_id", "users;", "id").is_err());
        assert!(table.columns().is_empty());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut table = TableBuilder::new("users").unwrap();
        table.string("email").unwrap();
        assert!(table.string("EMAIL").is_err());
    }

    #[test]
    fn test_text_default_is_escaped() {
        let mut table = TableBuilder::new("settings").unwrap();
        table.string("label").unwrap().default("it's").unwrap();
        let sql = &table.create_statements(DriverKind::Postgres).unwrap()[0];
        assert!(sql.contains("DEFAULT 'it''s'"));
    }

    #[test]
    fn test_drop_statement() {
        assert_eq!(
            TableBuilder::drop_statement("todos").unwrap(),
            "DROP TABLE IF EXISTS todos"
        );
        assert!(TableBuilder::drop_statement("todos; --").is_err());
    }
}
