//! Built-in migrations.

use super::{MIGRATIONS_TABLE, Migration, MigrationRef, MigrationSet};
use crate::db::Transaction;
use crate::error::DbResult;
use crate::schema::{DefaultValue, TableBuilder};
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Column definitions of one table.
pub type TableDefinition = fn(&mut TableBuilder) -> DbResult<()>;

/// Migration that creates a table on `up` and drops it on `down`.
#[derive(Debug, Clone, Copy)]
pub struct TableMigration {
    name: &'static str,
    table: &'static str,
    system: bool,
    define: TableDefinition,
}

impl TableMigration {
    pub const fn new(name: &'static str, table: &'static str, define: TableDefinition) -> Self {
        Self {
            name,
            table,
            system: false,
            define,
        }
    }

    /// Migration owning the bookkeeping table.
    pub const fn system(name: &'static str, table: &'static str, define: TableDefinition) -> Self {
        Self {
            name,
            table,
            system: true,
            define,
        }
    }

    /// Table definition, validated.
    pub fn builder(&self) -> DbResult<TableBuilder> {
        let mut table = TableBuilder::new(self.table)?;
        (self.define)(&mut table)?;
        Ok(table)
    }
}

impl Migration for TableMigration {
    fn name(&self) -> &str {
        self.name
    }

    fn is_system(&self) -> bool {
        self.system
    }

    fn up<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move { self.builder()?.execute(tx).await })
    }

    fn down<'a>(&'a self, tx: &'a mut Transaction) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move { TableBuilder::drop(tx, self.table).await })
    }
}

fn table(migration: TableMigration) -> MigrationRef {
    Arc::new(migration)
}

/// The migrations every tenant database receives.
pub fn builtin() -> DbResult<MigrationSet> {
    MigrationSet::new(vec![
        table(TableMigration::system(
            "000_create_migrations_table",
            MIGRATIONS_TABLE,
            migrations_table,
        )),
        table(TableMigration::new("001_create_users_table", "users", users_table)),
        table(TableMigration::new(
            "002_create_task_statuses_table",
            "task_statuses",
            task_statuses_table,
        )),
        table(TableMigration::new("003_create_tasks_table", "tasks", tasks_table)),
        table(TableMigration::new("004_create_todos_table", "todos", todos_table)),
        table(TableMigration::new(
            "005_create_settings_table",
            "settings",
            settings_table,
        )),
    ])
}

fn migrations_table(t: &mut TableBuilder) -> DbResult<()> {
    t.id();
    t.string("migration_name")?.unique()?;
    t.datetime("executed_at")?
        .default(DefaultValue::CurrentTimestamp)?;
    Ok(())
}

fn users_table(t: &mut TableBuilder) -> DbResult<()> {
    t.id();
    t.string("name")?;
    t.string("email")?.unique()?;
    t.string("password")?;
    t.timestamps();
    Ok(())
}

fn task_statuses_table(t: &mut TableBuilder) -> DbResult<()> {
    t.id();
    t.string_len("name", 50)?.unique()?;
    t.string_len("label", 100)?;
    t.integer("sort_order")?.default(0)?;
    t.timestamps();
    Ok(())
}

fn tasks_table(t: &mut TableBuilder) -> DbResult<()> {
    t.id();
    t.foreign_key("user_id", "users", "id")?.index()?;
    t.foreign_key("status_id", "task_statuses", "id")?;
    t.string("title")?;
    t.text("description")?.nullable()?;
    t.date("due_date")?.nullable()?;
    t.timestamps();
    Ok(())
}

fn todos_table(t: &mut TableBuilder) -> DbResult<()> {
    t.id();
    t.foreign_key("user_id", "users", "id")?.index()?;
    t.string("title")?;
    t.boolean("completed")?.default(false)?;
    t.integer("position")?.default(0)?;
    t.timestamps();
    Ok(())
}

fn settings_table(t: &mut TableBuilder) -> DbResult<()> {
    t.id();
    t.string_len("setting_key", 100)?.unique()?;
    t.text("setting_value")?.nullable()?;
    t.timestamps();
    Ok(())
}
