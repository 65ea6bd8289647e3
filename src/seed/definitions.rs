//! Built-in seeders.

use super::{Seeder, SeederRef};
use crate::db::Transaction;
use crate::error::DbResult;
use crate::models::QueryParam;
use crate::params;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// The seeders every tenant database receives.
pub fn builtin() -> Vec<SeederRef> {
    vec![
        Arc::new(TaskStatusSeeder) as SeederRef,
        Arc::new(DefaultSettingsSeeder) as SeederRef,
    ]
}

/// Insert a row unless one with the same key exists. Returns whether a row
/// was inserted.
async fn insert_missing(
    tx: &mut Transaction,
    exists_sql: &str,
    key: &str,
    insert_sql: &str,
    values: &[QueryParam],
) -> DbResult<bool> {
    if !tx.query(exists_sql, &params![key]).await?.is_empty() {
        return Ok(false);
    }
    tx.execute(insert_sql, values).await?;
    Ok(true)
}

const TASK_STATUSES: &[(&str, &str, i64)] = &[
    ("todo", "To do", 1),
    ("in_progress", "In progress", 2),
    ("done", "Done", 3),
];

/// Workflow states available to tasks.
#[derive(Debug, Clone, Copy)]
pub struct TaskStatusSeeder;

impl Seeder for TaskStatusSeeder {
    fn name(&self) -> &str {
        "001_task_statuses"
    }

    fn up<'a>(
        &'a self,
        tx: &'a mut Transaction,
        _tenant_id: &'a str,
    ) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            for (name, label, sort_order) in TASK_STATUSES {
                insert_missing(
                    tx,
                    "SELECT id FROM task_statuses WHERE name = ?",
                    name,
                    "INSERT INTO task_statuses (name, label, sort_order) VALUES (?, ?, ?)",
                    &params![*name, *label, *sort_order],
                )
                .await?;
            }
            Ok(())
        })
    }

    fn down<'a>(
        &'a self,
        tx: &'a mut Transaction,
        _tenant_id: &'a str,
    ) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            for (name, _, _) in TASK_STATUSES {
                tx.execute("DELETE FROM task_statuses WHERE name = ?", &params![*name])
                    .await?;
            }
            Ok(())
        })
    }
}

fn default_settings(tenant_id: &str) -> [(&'static str, String); 4] {
    [
        ("tenant_id", tenant_id.to_string()),
        ("timezone", "UTC".to_string()),
        ("locale", "en".to_string()),
        ("items_per_page", "20".to_string()),
    ]
}

/// Per-tenant key/value settings.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSettingsSeeder;

impl Seeder for DefaultSettingsSeeder {
    fn name(&self) -> &str {
        "002_default_settings"
    }

    fn up<'a>(
        &'a self,
        tx: &'a mut Transaction,
        tenant_id: &'a str,
    ) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            for (key, value) in default_settings(tenant_id) {
                insert_missing(
                    tx,
                    "SELECT id FROM settings WHERE setting_key = ?",
                    key,
                    "INSERT INTO settings (setting_key, setting_value) VALUES (?, ?)",
                    &params![key, value],
                )
                .await?;
            }
            Ok(())
        })
    }

    fn down<'a>(
        &'a self,
        tx: &'a mut Transaction,
        tenant_id: &'a str,
    ) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            for (key, _) in default_settings(tenant_id) {
                tx.execute("DELETE FROM settings WHERE setting_key = ?", &params![key])
                    .await?;
            }
            Ok(())
        })
    }
}
