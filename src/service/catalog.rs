//! Admin-side lifecycle of tenant configs: onboarding with introspection,
//! schema refresh and deletion.

use tracing::info;
use url::Url;

use crate::db::models::{ConfigId, DbEngine, NewDbConfig, PrincipalId};
use crate::db::sqlite::HubStorage;
use crate::error::HubError;
use crate::service::introspector::summarize_schema;
use crate::service::pool_manager::{ConnectTarget, PoolManager};

const MYSQL_DEFAULT_PORT: u16 = 3306;

/// Connection details as submitted by an admin.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub conn_string: Option<String>,
}

impl ConnectRequest {
    /// Normalize into a storable config. A `mysql://` string fills any field
    /// not given explicitly and is stored without its password; a `sqlite:`
    /// string selects the SQLite engine.
    pub fn into_new_config(self, owner: PrincipalId) -> Result<NewDbConfig, HubError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let mut host = non_empty(self.host);
        let mut port = self.port;
        let mut user = non_empty(self.user);
        let mut password = non_empty(self.password);
        let mut database = non_empty(self.database);
        let mut conn_string = non_empty(self.conn_string);
        let mut engine = DbEngine::MySql;

        if let Some(raw) = conn_string.clone() {
            if raw.starts_with("sqlite:") {
                engine = DbEngine::Sqlite;
            } else {
                let mut parsed = Url::parse(&raw)
                    .map_err(|e| HubError::InvalidInput(format!("invalid connString: {e}")))?;
                if !matches!(parsed.scheme(), "mysql" | "mariadb") {
                    return Err(HubError::InvalidInput(format!(
                        "unsupported connString scheme `{}`",
                        parsed.scheme()
                    )));
                }
                host = host.or_else(|| parsed.host_str().map(str::to_string));
                port = port.or(parsed.port());
                if user.is_none() && !parsed.username().is_empty() {
                    user = Some(parsed.username().to_string());
                }
                if password.is_none() {
                    password = parsed.password().map(str::to_string);
                }
                if database.is_none() {
                    database = parsed
                        .path_segments()
                        .and_then(|mut s| s.next())
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                }
                if parsed.password().is_some() {
                    // infallible for URLs that carry a host
                    let _ = parsed.set_password(None);
                }
                conn_string = Some(parsed.to_string());
            }
        }

        if engine == DbEngine::MySql && host.is_none() {
            return Err(HubError::InvalidInput(
                "host or connString is required".to_string(),
            ));
        }

        let name = non_empty(self.name)
            .or_else(|| database.clone())
            .or_else(|| host.clone())
            .unwrap_or_else(|| "database".to_string());

        Ok(NewDbConfig {
            name,
            owner,
            engine,
            host,
            port: port.unwrap_or(MYSQL_DEFAULT_PORT),
            user,
            password,
            database,
            conn_string,
        })
    }
}

/// Connect to a candidate database, introspect it and store it as the new
/// global default. Nothing is stored if either step fails.
pub async fn register(
    storage: &HubStorage,
    pools: &PoolManager,
    cfg: NewDbConfig,
) -> Result<(ConfigId, String), HubError> {
    let target = ConnectTarget::from_new(&cfg)?;
    let label = cfg.database.clone().unwrap_or_else(|| cfg.name.clone());

    let pool = pools.connect_ephemeral(&target).await?;
    let summary = summarize_schema(&pool, &label, pools.settings().introspect_timeout()).await;
    pool.close().await;
    let summary = summary?;

    let id = storage.insert_config_as_active(cfg, &summary).await?;
    info!(config_id = id, database = %label, target = %target.describe(), "database registered");
    Ok((id, summary))
}

/// Re-introspect a stored config and replace its cached summary.
pub async fn refresh(
    storage: &HubStorage,
    pools: &PoolManager,
    id: ConfigId,
) -> Result<String, HubError> {
    let cfg = storage.get_config(id).await?;
    let pool = pools.acquire(&cfg).await?;
    let summary =
        summarize_schema(&pool, cfg.database_label(), pools.settings().introspect_timeout())
            .await?;
    storage.update_schema_summary(id, &summary).await?;
    info!(config_id = id, "schema summary refreshed");
    Ok(summary)
}

/// Delete a config and tear down its pool.
pub async fn remove(storage: &HubStorage, pools: &PoolManager, id: ConfigId) -> Result<(), HubError> {
    storage.delete_config(id).await?;
    pools.evict(id).await;
    info!(config_id = id, "database config deleted");
    Ok(())
}
