//! Keyed cache of bounded connection pools, one per tenant config.
//!
//! Each config id owns a slot guarded by its own async mutex, so concurrent
//! requests for the same tenant build at most one pool while other tenants
//! proceed untouched. A slot remembers a fingerprint of the resolved
//! credentials; a mismatch tears the old pool down and builds a new one.
//! Connections go back to their pool when the query future finishes or is
//! dropped, success or not.

use backon::{ExponentialBuilder, Retryable};
use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::db::models::{ConfigId, DbConfig, DbEngine, NewDbConfig};
use crate::error::{HubError, IsRetryable};
use crate::service::safety_gate::StatementKind;
use crate::service::vault::CredentialVault;

pub type ResultRow = Map<String, Value>;

/// Fully resolved connection parameters. Holds a plaintext password, so it
/// lives only for the duration of a connect and is never logged.
#[derive(Clone)]
pub enum ConnectTarget {
    MySql {
        host: String,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        database: Option<String>,
    },
    Sqlite {
        url: String,
    },
}

impl ConnectTarget {
    /// Resolve a stored config, decrypting its password through the vault.
    pub fn resolve(cfg: &DbConfig, vault: &CredentialVault) -> Result<Self, HubError> {
        let password = cfg
            .password
            .as_deref()
            .map(|p| vault.decrypt(p))
            .transpose()
            .map_err(|e| HubError::Connection {
                target: format!("config {}", cfg.id),
                reason: e.to_string(),
            })?;
        Self::build(
            cfg.engine,
            cfg.host.clone(),
            cfg.port,
            cfg.user.clone(),
            password,
            cfg.database.clone(),
            cfg.conn_string.as_deref(),
        )
    }

    /// Target for a config that has not been stored yet (plaintext password).
    pub fn from_new(cfg: &NewDbConfig) -> Result<Self, HubError> {
        Self::build(
            cfg.engine,
            cfg.host.clone(),
            cfg.port,
            cfg.user.clone(),
            cfg.password.clone(),
            cfg.database.clone(),
            cfg.conn_string.as_deref(),
        )
    }

    fn build(
        engine: DbEngine,
        host: Option<String>,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        database: Option<String>,
        conn_string: Option<&str>,
    ) -> Result<Self, HubError> {
        match engine {
            DbEngine::MySql => {
                let host = host.filter(|h| !h.is_empty()).ok_or_else(|| {
                    HubError::InvalidInput("a MySQL config needs a host".to_string())
                })?;
                Ok(Self::MySql {
                    host,
                    port,
                    user,
                    password,
                    database,
                })
            }
            DbEngine::Sqlite => {
                let url = conn_string.ok_or_else(|| {
                    HubError::InvalidInput("a SQLite config needs a sqlite: connString".to_string())
                })?;
                Ok(Self::Sqlite {
                    url: url.to_string(),
                })
            }
        }
    }

    /// Password-free description for logs and error context.
    pub fn describe(&self) -> String {
        match self {
            Self::MySql {
                host,
                port,
                user,
                database,
                ..
            } => format!(
                "mysql://{}@{host}:{port}/{}",
                user.as_deref().unwrap_or(""),
                database.as_deref().unwrap_or("")
            ),
            Self::Sqlite { url } => url.clone(),
        }
    }

    /// Digest of everything that identifies a live pool, password included.
    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Self::MySql {
                host,
                port,
                user,
                password,
                database,
            } => {
                for part in [
                    "mysql",
                    host,
                    &port.to_string(),
                    user.as_deref().unwrap_or(""),
                    password.as_deref().unwrap_or(""),
                    database.as_deref().unwrap_or(""),
                ] {
                    hasher.update(part.as_bytes());
                    hasher.update([0u8]);
                }
            }
            Self::Sqlite { url } => {
                hasher.update(b"sqlite\0");
                hasher.update(url.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    async fn connect(&self, settings: &PoolConfig) -> Result<TenantPool, sqlx::Error> {
        match self {
            Self::MySql {
                host,
                port,
                user,
                password,
                database,
            } => {
                let mut opts = MySqlConnectOptions::new().host(host).port(*port);
                if let Some(user) = user {
                    opts = opts.username(user);
                }
                if let Some(password) = password {
                    opts = opts.password(password);
                }
                if let Some(database) = database {
                    opts = opts.database(database);
                }
                MySqlPoolOptions::new()
                    .max_connections(settings.max_connections)
                    .acquire_timeout(settings.acquire_timeout())
                    .idle_timeout(Some(settings.idle_timeout()))
                    .connect_with(opts)
                    .await
                    .map(TenantPool::MySql)
            }
            Self::Sqlite { url } => {
                let opts = SqliteConnectOptions::from_str(url)?;
                SqlitePoolOptions::new()
                    .max_connections(settings.max_connections)
                    .acquire_timeout(settings.acquire_timeout())
                    .idle_timeout(Some(settings.idle_timeout()))
                    .connect_with(opts)
                    .await
                    .map(TenantPool::Sqlite)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
}

/// A bounded pool to one tenant database. Cloning shares the pool.
#[derive(Clone, Debug)]
pub enum TenantPool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl TenantPool {
    /// Run one statement. Row-returning statements yield JSON objects keyed by
    /// column; mutations yield a single `{"affectedRows": n}` row.
    pub async fn execute(
        &self,
        sql: &str,
        kind: StatementKind,
    ) -> Result<Vec<ResultRow>, sqlx::Error> {
        match (self, kind.returns_rows()) {
            (Self::MySql(pool), true) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                Ok(rows.iter().map(mysql_row_to_json).collect())
            }
            (Self::Sqlite(pool), true) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                Ok(rows.iter().map(sqlite_row_to_json).collect())
            }
            (Self::MySql(pool), false) => {
                let done = sqlx::query(sql).execute(pool).await?;
                Ok(vec![affected(done.rows_affected())])
            }
            (Self::Sqlite(pool), false) => {
                let done = sqlx::query(sql).execute(pool).await?;
                Ok(vec![affected(done.rows_affected())])
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        match self {
            Self::MySql(pool) => PoolStats {
                size: pool.size(),
                idle: pool.num_idle(),
                max: pool.options().get_max_connections(),
            },
            Self::Sqlite(pool) => PoolStats {
                size: pool.size(),
                idle: pool.num_idle(),
                max: pool.options().get_max_connections(),
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::MySql(pool) => pool.is_closed(),
            Self::Sqlite(pool) => pool.is_closed(),
        }
    }

    /// Close every connection; waits for checked-out connections to return.
    pub async fn close(&self) {
        match self {
            Self::MySql(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

fn affected(n: u64) -> ResultRow {
    let mut row = Map::new();
    row.insert("affectedRows".to_string(), Value::from(n));
    row
}

fn blob(bytes: Vec<u8>) -> Value {
    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn mysql_text(row: &MySqlRow, idx: usize) -> Value {
    row.try_get_unchecked::<String, _>(idx)
        .map(Value::String)
        .unwrap_or(Value::Null)
}

fn mysql_value(row: &MySqlRow, idx: usize) -> Value {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "BOOLEAN" => row
            .try_get::<bool, _>(idx)
            .map(Value::Bool)
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or_else(|_| mysql_text(row, idx)),
        t if t.ends_with("UNSIGNED") => row
            .try_get::<u64, _>(idx)
            .map(Value::from)
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "FLOAT" => row
            .try_get::<f32, _>(idx)
            .map(|v| Value::from(f64::from(v)))
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "DOUBLE" => row
            .try_get::<f64, _>(idx)
            .map(Value::from)
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "DATETIME" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "TIMESTAMP" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "JSON" => row
            .try_get::<Value, _>(idx)
            .unwrap_or_else(|_| mysql_text(row, idx)),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .map(blob)
            .unwrap_or(Value::Null),
        // DECIMAL, CHAR, VARCHAR, TEXT, ENUM, SET, YEAR
        _ => mysql_text(row, idx),
    }
}

fn mysql_row_to_json(row: &MySqlRow) -> ResultRow {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), mysql_value(row, col.ordinal())))
        .collect()
}

fn sqlite_value(row: &SqliteRow, idx: usize) -> Value {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let text = || {
        row.try_get_unchecked::<String, _>(idx)
            .map(Value::String)
            .unwrap_or(Value::Null)
    };
    match type_name.as_str() {
        "INTEGER" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or_else(|_| text()),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(Value::from)
            .unwrap_or_else(|_| text()),
        "BOOLEAN" => row
            .try_get::<bool, _>(idx)
            .map(Value::Bool)
            .unwrap_or_else(|_| text()),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(blob)
            .unwrap_or(Value::Null),
        _ => text(),
    }
}

fn sqlite_row_to_json(row: &SqliteRow) -> ResultRow {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), sqlite_value(row, col.ordinal())))
        .collect()
}

struct CachedPool {
    fingerprint: String,
    pool: TenantPool,
}

#[derive(Default)]
struct SlotState {
    cached: Option<CachedPool>,
    /// Set once the config is deleted; a holder of this slot must not reopen it.
    retired: bool,
}

type Slot = Arc<tokio::sync::Mutex<SlotState>>;

#[derive(Default)]
struct Registry {
    slots: HashMap<ConfigId, Slot>,
    /// Config ids are never reused, so a deleted id stays refused for good.
    retired: HashSet<ConfigId>,
}

struct PoolManagerInner {
    registry: Mutex<Registry>,
    vault: CredentialVault,
    settings: PoolConfig,
    created: AtomicU64,
}

/// Owns every tenant pool. Cheap to clone.
#[derive(Clone)]
pub struct PoolManager {
    inner: Arc<PoolManagerInner>,
}

impl PoolManager {
    pub fn new(vault: CredentialVault, settings: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolManagerInner {
                registry: Mutex::new(Registry::default()),
                vault,
                settings,
                created: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &PoolConfig {
        &self.inner.settings
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, id: ConfigId) -> Result<Slot, HubError> {
        let mut registry = self.registry();
        if registry.retired.contains(&id) {
            return Err(HubError::ConfigNotFound(id));
        }
        Ok(registry.slots.entry(id).or_default().clone())
    }

    fn existing_slot(&self, id: ConfigId) -> Option<Slot> {
        self.registry().slots.get(&id).cloned()
    }

    /// Pool for `cfg`, reusing the cached one while its credentials match.
    /// Fails with `ConfigNotFound` once `cfg` has been evicted.
    pub async fn acquire(&self, cfg: &DbConfig) -> Result<TenantPool, HubError> {
        let target = ConnectTarget::resolve(cfg, &self.inner.vault)?;
        let fingerprint = target.fingerprint();
        let slot = self.slot(cfg.id)?;
        let mut state = slot.lock().await;
        if state.retired {
            return Err(HubError::ConfigNotFound(cfg.id));
        }

        if let Some(cached) = state.cached.as_ref() {
            if cached.fingerprint == fingerprint && !cached.pool.is_closed() {
                return Ok(cached.pool.clone());
            }
            info!(config_id = cfg.id, "credentials changed; replacing pool");
        }

        let pool = self.connect(&target).await?;
        if let Some(stale) = state.cached.replace(CachedPool {
            fingerprint,
            pool: pool.clone(),
        }) {
            let config_id = cfg.id;
            tokio::spawn(async move {
                stale.pool.close().await;
                info!(config_id, "stale tenant pool closed");
            });
        }
        debug!(config_id = cfg.id, target = %target.describe(), "pool cached");
        Ok(pool)
    }

    /// Build an uncached pool, e.g. to introspect a config before it is stored.
    /// The caller closes it.
    pub async fn connect_ephemeral(&self, target: &ConnectTarget) -> Result<TenantPool, HubError> {
        self.connect(target).await
    }

    /// Establish a pool with bounded retries for transient transport errors,
    /// all under the connect timeout.
    async fn connect(&self, target: &ConnectTarget) -> Result<TenantPool, HubError> {
        let settings = &self.inner.settings;
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(settings.connect_retries)
            .with_jitter();

        let attempt = (|| async { target.connect(settings).await })
            .retry(retry_policy)
            .when(|e: &sqlx::Error| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(
                    target = %target.describe(),
                    "connect failed: {}, retrying in {:?}", err, dur
                );
            });

        let pool = match tokio::time::timeout(settings.connect_timeout(), attempt).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                return Err(HubError::Connection {
                    target: target.describe(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(HubError::Connection {
                    target: target.describe(),
                    reason: format!("timed out after {:?}", settings.connect_timeout()),
                });
            }
        };
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        info!(target = %target.describe(), max = settings.max_connections, "tenant pool opened");
        Ok(pool)
    }

    /// Close the pool for a deleted config and refuse to open it again.
    pub async fn evict(&self, id: ConfigId) {
        let slot = {
            let mut registry = self.registry();
            registry.retired.insert(id);
            registry.slots.remove(&id)
        };
        if let Some(slot) = slot {
            let mut state = slot.lock().await;
            state.retired = true;
            if let Some(cached) = state.cached.take() {
                cached.pool.close().await;
                info!(config_id = id, "tenant pool closed");
            }
        }
    }

    /// Close every cached pool.
    pub async fn shutdown(&self) {
        let slots: Vec<(ConfigId, Slot)> = self.registry().slots.drain().collect();
        futures::future::join_all(slots.into_iter().map(|(id, slot)| async move {
            if let Some(cached) = slot.lock().await.cached.take() {
                cached.pool.close().await;
                debug!(config_id = id, "tenant pool closed on shutdown");
            }
        }))
        .await;
    }

    pub async fn stats(&self, id: ConfigId) -> Option<PoolStats> {
        let slot = self.existing_slot(id)?;
        let guard = slot.lock().await;
        guard.cached.as_ref().map(|c| c.pool.stats())
    }

    /// Number of pools opened over the manager's lifetime.
    pub fn pools_created(&self) -> u64 {
        self.inner.created.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// A throwaway SQLite tenant database with an `orders` table of `rows` rows.
    pub(crate) async fn tenant_file(tag: &str, rows: i64) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX_EPOCH")
            .as_nanos();
        let mut path = std::env::temp_dir();
        path.push(format!(
            "nl2sql-hub-{tag}-{}-{}.sqlite",
            std::process::id(),
            nanos
        ));

        let opts = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT NOT NULL, total REAL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, photo BLOB)")
            .execute(&pool)
            .await
            .unwrap();
        for i in 0..rows {
            sqlx::query("INSERT INTO orders (customer, total) VALUES (?, ?)")
                .bind(format!("c{i}"))
                .bind(i as f64 * 1.5)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
        path
    }

    pub(crate) fn sqlite_config(id: ConfigId, path: &std::path::Path) -> DbConfig {
        DbConfig {
            id,
            name: format!("tenant-{id}"),
            owner: 1,
            engine: DbEngine::Sqlite,
            host: None,
            port: 0,
            user: None,
            password: None,
            database: Some(format!("tenant{id}")),
            conn_string: Some(format!("sqlite://{}", path.display())),
            schema_summary: String::new(),
            active: false,
            created_at: Utc::now(),
        }
    }

    fn manager(max: u32) -> PoolManager {
        let vault = CredentialVault::new(&VaultConfig::default()).unwrap();
        PoolManager::new(
            vault,
            PoolConfig {
                max_connections: max,
                connect_retries: 1,
                connect_timeout_secs: 5,
                ..PoolConfig::default()
            },
        )
    }

    async fn wait_all_idle(pools: &PoolManager, id: ConfigId) -> PoolStats {
        for _ in 0..100 {
            let stats = pools.stats(id).await.unwrap();
            if stats.idle as u32 == stats.size {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pools.stats(id).await.unwrap()
    }

    #[tokio::test]
    async fn rows_come_back_as_json_objects() {
        let path = tenant_file("rows", 3).await;
        let pools = manager(5);
        let cfg = sqlite_config(1, &path);
        let pool = pools.acquire(&cfg).await.unwrap();

        let rows = pool
            .execute(
                "SELECT id, customer, total FROM orders ORDER BY id",
                StatementKind::Select,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["id"], Value::from(1));
        assert_eq!(rows[1]["customer"], Value::from("c1"));
        assert_eq!(rows[2]["total"], Value::from(3.0));

        let count = pool
            .execute("SELECT COUNT(*) AS n FROM orders", StatementKind::Select)
            .await
            .unwrap();
        assert_eq!(count[0]["n"], Value::from(3));

        pools.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn mutations_report_affected_rows() {
        let path = tenant_file("mut", 4).await;
        let pools = manager(5);
        let pool = pools.acquire(&sqlite_config(1, &path)).await.unwrap();

        let rows = pool
            .execute("DELETE FROM orders WHERE id <= 2", StatementKind::Delete)
            .await
            .unwrap();
        assert_eq!(rows[0]["affectedRows"], Value::from(2));

        pools.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn same_config_shares_one_pool() {
        let path = tenant_file("share", 1).await;
        let pools = manager(5);
        let cfg = sqlite_config(7, &path);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let pools = pools.clone();
                let cfg = cfg.clone();
                tokio::spawn(async move { pools.acquire(&cfg).await.map(|_| ()) })
            })
            .collect();
        for h in futures::future::join_all(handles).await {
            h.unwrap().unwrap();
        }
        assert_eq!(pools.pools_created(), 1);

        pools.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn concurrent_queries_stay_under_ceiling_and_release() {
        let path = tenant_file("ceiling", 20).await;
        let pools = manager(3);
        let cfg = sqlite_config(2, &path);

        let handles: Vec<_> = (0..24)
            .map(|i| {
                let pools = pools.clone();
                let cfg = cfg.clone();
                tokio::spawn(async move {
                    let pool = pools.acquire(&cfg).await?;
                    let sql = if i % 4 == 0 {
                        "SELECT * FROM missing_table"
                    } else {
                        "SELECT * FROM orders"
                    };
                    let res = pool.execute(sql, StatementKind::Select).await;
                    let stats = pool.stats();
                    assert!(stats.size <= 3, "pool grew to {}", stats.size);
                    Ok::<_, HubError>(res.is_ok())
                })
            })
            .collect();

        let mut failures = 0;
        for h in futures::future::join_all(handles).await {
            if !h.unwrap().unwrap() {
                failures += 1;
            }
        }
        assert_eq!(failures, 6);

        let stats = wait_all_idle(&pools, 2).await;
        assert!(stats.size <= 3);
        assert_eq!(stats.max, 3);
        assert_eq!(stats.idle as u32, stats.size, "a connection was not released");

        pools.shutdown().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn changed_target_replaces_pool() {
        let first = tenant_file("rot-a", 1).await;
        let second = tenant_file("rot-b", 2).await;
        let pools = manager(5);

        let cfg = sqlite_config(3, &first);
        pools.acquire(&cfg).await.unwrap();
        pools.acquire(&cfg).await.unwrap();
        assert_eq!(pools.pools_created(), 1);

        let moved = sqlite_config(3, &second);
        let pool = pools.acquire(&moved).await.unwrap();
        assert_eq!(pools.pools_created(), 2);
        let rows = pool
            .execute("SELECT COUNT(*) AS n FROM orders", StatementKind::Select)
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], Value::from(2));

        pools.shutdown().await;
        let _ = std::fs::remove_file(&first);
        let _ = std::fs::remove_file(&second);
    }

    #[tokio::test]
    async fn evict_closes_the_pool() {
        let path = tenant_file("evict", 1).await;
        let pools = manager(5);
        let cfg = sqlite_config(4, &path);
        let pool = pools.acquire(&cfg).await.unwrap();

        pools.evict(cfg.id).await;
        assert!(pool.is_closed());
        assert!(pools.stats(cfg.id).await.is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn evicted_config_is_never_reopened() {
        let path = tenant_file("retired", 1).await;
        let pools = manager(5);
        let cfg = sqlite_config(6, &path);
        pools.acquire(&cfg).await.unwrap();

        // A request that picked up the slot before the delete landed.
        let in_flight = pools.slot(cfg.id).unwrap();
        pools.evict(cfg.id).await;
        assert!(pools.registry().slots.is_empty());
        assert!(in_flight.lock().await.retired);

        let err = pools.acquire(&cfg).await.unwrap_err();
        assert!(matches!(err, HubError::ConfigNotFound(6)), "{err:?}");
        assert!(pools.stats(cfg.id).await.is_none());
        assert_eq!(pools.pools_created(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn acquire_racing_an_evict_leaves_nothing_cached() {
        let path = tenant_file("retired-race", 1).await;
        let pools = manager(5);
        let cfg = sqlite_config(7, &path);

        let (acquired, ()) = tokio::join!(pools.acquire(&cfg), pools.evict(cfg.id));
        if let Ok(pool) = acquired {
            // The acquire won the slot first; evict then closed what it cached.
            assert!(pool.is_closed());
        }
        assert!(pools.stats(cfg.id).await.is_none());
        assert!(pools.acquire(&cfg).await.is_err());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unreachable_database_is_a_connection_error() {
        let pools = manager(5);
        let mut cfg = sqlite_config(5, std::path::Path::new("/nonexistent/dir/none.sqlite"));
        cfg.conn_string = Some("sqlite:///nonexistent/dir/none.sqlite?mode=ro".into());
        let err = pools.acquire(&cfg).await.unwrap_err();
        assert!(matches!(err, HubError::Connection { .. }), "{err:?}");
    }

    #[test]
    fn fingerprint_tracks_password() {
        let a = ConnectTarget::MySql {
            host: "db1".into(),
            port: 3306,
            user: Some("a".into()),
            password: Some("p".into()),
            database: Some("salesdb".into()),
        };
        let mut b = a.clone();
        if let ConnectTarget::MySql { password, .. } = &mut b {
            *password = Some("rotated".into());
        }
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.describe(), "mysql://a@db1:3306/salesdb");
        assert_eq!(a.describe(), b.describe());
    }
}
