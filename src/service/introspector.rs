//! Renders a tenant database's tables and columns as the compact text the
//! oracle sees, one `table(col (type), ...)` line per table.

use sqlx::Row;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::HubError;
use crate::service::pool_manager::TenantPool;

/// Table name to `(column, declared type)` in ordinal order.
type Layout = BTreeMap<String, Vec<(String, String)>>;

/// Summarize every table visible through `pool`, bounded by `timeout`.
/// `database` names the target in errors and logs.
pub async fn summarize_schema(
    pool: &TenantPool,
    database: &str,
    timeout: Duration,
) -> Result<String, HubError> {
    let layout = match tokio::time::timeout(timeout, read_layout(pool)).await {
        Ok(Ok(layout)) => layout,
        Ok(Err(e)) => {
            warn!(database, error = %e, "schema introspection failed");
            return Err(HubError::Introspection {
                database: database.to_string(),
                reason: e.to_string(),
            });
        }
        Err(_) => {
            warn!(database, ?timeout, "schema introspection timed out");
            return Err(HubError::Introspection {
                database: database.to_string(),
                reason: format!("timed out after {timeout:?}"),
            });
        }
    };

    if layout.is_empty() {
        return Err(HubError::Introspection {
            database: database.to_string(),
            reason: "no tables visible to the configured credentials".to_string(),
        });
    }

    debug!(database, tables = layout.len(), "schema introspected");
    Ok(render(&layout))
}

fn render(layout: &Layout) -> String {
    layout
        .iter()
        .map(|(table, columns)| {
            let cols = columns
                .iter()
                .map(|(name, ty)| format!("{name} ({ty})"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{table}({cols})")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn read_layout(pool: &TenantPool) -> Result<Layout, sqlx::Error> {
    match pool {
        TenantPool::MySql(pool) => {
            let tables = sqlx::query(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME",
            )
            .fetch_all(pool)
            .await?;
            let columns = sqlx::query(
                "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME, ORDINAL_POSITION",
            )
            .fetch_all(pool)
            .await?;

            let mut layout = Layout::new();
            for row in tables {
                // information_schema reports names as VARBINARY on some servers
                layout.insert(row.try_get_unchecked::<String, _>(0)?, Vec::new());
            }
            for row in columns {
                let table: String = row.try_get_unchecked(0)?;
                let column: String = row.try_get_unchecked(1)?;
                let ty: String = row.try_get_unchecked(2)?;
                layout.entry(table).or_default().push((column, ty));
            }
            Ok(layout)
        }
        TenantPool::Sqlite(pool) => {
            let tables: Vec<(String,)> = sqlx::query_as(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .fetch_all(pool)
            .await?;

            let mut layout = Layout::new();
            for (table,) in tables {
                let columns: Vec<(String, String)> = sqlx::query_as(
                    "SELECT name, type FROM pragma_table_info(?) ORDER BY cid",
                )
                .bind(&table)
                .fetch_all(pool)
                .await?;
                layout.insert(table, columns);
            }
            Ok(layout)
        }
    }
}
