use crate::db::models::{
    ConfigId, DbConfig, DbEngine, NewDbConfig, NewPrincipal, Principal, PrincipalId, Role,
};
use crate::db::schema::SQLITE_INIT;
use crate::error::HubError;
use crate::service::vault::CredentialVault;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use tracing::info;

pub type SqlitePool = Pool<Sqlite>;

const CONFIG_COLUMNS: &str = r#"id, name, owner, engine, host, port, user, password,
    database_name, conn_string, schema_summary, active, created_at"#;

const PRINCIPAL_COLUMNS: &str = r#"id, email, key_hash, role, active, assigned_db,
    active_db_config, created_by, created_at"#;

/// Durable store for tenant configs and principals. Passwords pass through the
/// vault on every write, so nothing below this type ever sees plaintext.
#[derive(Clone)]
pub struct HubStorage {
    pool: SqlitePool,
    vault: CredentialVault,
}

impl HubStorage {
    pub fn new(pool: SqlitePool, vault: CredentialVault) -> Self {
        Self { pool, vault }
    }

    /// Open (creating if missing) the control-plane database and apply the schema.
    pub async fn connect(database_url: &str, vault: CredentialVault) -> Result<Self, HubError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;
        let storage = Self::new(pool, vault);
        storage.init_schema().await?;
        info!(database_url, "control-plane storage ready");
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), HubError> {
        // sqlx::query runs a single statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn seal_password(&self, password: Option<&str>) -> Result<Option<String>, HubError> {
        password
            .map(|p| self.vault.encrypt(p))
            .transpose()
            .map_err(|e| HubError::InvalidInput(e.to_string()))
    }

    /// Insert a new config and make it the global active one in the same transaction.
    pub async fn insert_config_as_active(
        &self,
        cfg: NewDbConfig,
        schema_summary: &str,
    ) -> Result<ConfigId, HubError> {
        let password = self.seal_password(cfg.password.as_deref())?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE db_configs SET active = 0 WHERE active = 1")
            .execute(&mut *tx)
            .await?;

        let rec: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO db_configs (
                name, owner, engine, host, port, user, password,
                database_name, conn_string, schema_summary, active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            RETURNING id
            "#,
        )
        .bind(cfg.name)
        .bind(cfg.owner)
        .bind(cfg.engine.as_str())
        .bind(cfg.host)
        .bind(i64::from(cfg.port))
        .bind(cfg.user)
        .bind(password)
        .bind(cfg.database)
        .bind(cfg.conn_string)
        .bind(schema_summary)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(rec.0)
    }

    pub async fn get_config(&self, id: ConfigId) -> Result<DbConfig, HubError> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM db_configs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(HubError::ConfigNotFound(id))?;
        Self::row_to_config(row)
    }

    pub async fn list_configs(&self) -> Result<Vec<DbConfig>, HubError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM db_configs ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_config).collect()
    }

    /// The legacy global default, if one is flagged.
    pub async fn global_active_id(&self) -> Result<Option<ConfigId>, HubError> {
        let rec: Option<(i64,)> = sqlx::query_as("SELECT id FROM db_configs WHERE active = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(rec.map(|r| r.0))
    }

    /// Move the legacy global flag to `id`. Clear-then-set runs as one
    /// transaction; the partial unique index forbids two active rows.
    pub async fn set_global_active(&self, id: ConfigId) -> Result<(), HubError> {
        let mut tx = self.pool.begin().await?;

        // write first: a read-then-write transaction cannot wait out a concurrent writer
        sqlx::query("UPDATE db_configs SET active = 0 WHERE active = 1")
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("UPDATE db_configs SET active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            // dropping `tx` rolls back the clear
            return Err(HubError::ConfigNotFound(id));
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_schema_summary(
        &self,
        id: ConfigId,
        schema_summary: &str,
    ) -> Result<(), HubError> {
        let res = sqlx::query("UPDATE db_configs SET schema_summary = ? WHERE id = ?")
            .bind(schema_summary)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(HubError::ConfigNotFound(id));
        }
        Ok(())
    }

    /// Delete a config. Admins pointing at it fall back to the global default;
    /// restricted users keep their (now dangling) assignment.
    pub async fn delete_config(&self, id: ConfigId) -> Result<(), HubError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query("DELETE FROM db_configs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            return Err(HubError::ConfigNotFound(id));
        }
        sqlx::query(
            "UPDATE principals SET active_db_config = NULL WHERE active_db_config = ? AND role = 'admin'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_principal(&self, p: NewPrincipal) -> Result<PrincipalId, HubError> {
        let rec: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO principals (
                email, key_hash, role, active, assigned_db, created_by, created_at
            ) VALUES (?, ?, ?, 1, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(p.email)
        .bind(p.key_hash)
        .bind(p.role.as_str())
        .bind(p.assigned_db)
        .bind(p.created_by)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.0)
    }

    /// Create the bootstrap admin unless the email is already taken.
    /// Returns the new id, or `None` when nothing was inserted.
    pub async fn ensure_admin(
        &self,
        email: &str,
        key_hash: &str,
    ) -> Result<Option<PrincipalId>, HubError> {
        if self.get_principal_by_email(email).await?.is_some() {
            return Ok(None);
        }
        let id = self
            .insert_principal(NewPrincipal {
                email: email.to_string(),
                key_hash: key_hash.to_string(),
                role: Role::Admin,
                assigned_db: None,
                created_by: Some("system".to_string()),
            })
            .await?;
        Ok(Some(id))
    }

    pub async fn get_principal(&self, id: PrincipalId) -> Result<Option<Principal>, HubError> {
        let row = sqlx::query(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_principal).transpose()
    }

    pub async fn get_principal_by_email(&self, email: &str) -> Result<Option<Principal>, HubError> {
        let row = sqlx::query(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE email = ?"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_principal).transpose()
    }

    pub async fn set_principal_active(&self, id: PrincipalId, active: bool) -> Result<(), HubError> {
        let active_i = if active { 1 } else { 0 };
        sqlx::query("UPDATE principals SET active = ? WHERE id = ?")
            .bind(active_i)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Point one admin's personal working database at `config`. Never touches
    /// the global flag or any other principal.
    pub async fn set_personal_active(
        &self,
        admin: PrincipalId,
        config: ConfigId,
    ) -> Result<(), HubError> {
        let res = sqlx::query(
            "UPDATE principals SET active_db_config = ? WHERE id = ? AND role = 'admin'",
        )
        .bind(config)
        .bind(admin)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(HubError::Authorization(
                "only admins can select a working database".to_string(),
            ));
        }
        Ok(())
    }

    fn row_to_config(row: SqliteRow) -> Result<DbConfig, HubError> {
        let engine_s: String = row.try_get("engine")?;
        let engine =
            DbEngine::from_str(&engine_s).map_err(|e| sqlx::Error::Decode(e.into()))?;
        let port_i: i64 = row.try_get("port")?;
        let port = u16::try_from(port_i).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let active_i: i64 = row.try_get("active")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(DbConfig {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner: row.try_get("owner")?,
            engine,
            host: row.try_get("host")?,
            port,
            user: row.try_get("user")?,
            password: row.try_get("password")?,
            database: row.try_get("database_name")?,
            conn_string: row.try_get("conn_string")?,
            schema_summary: row.try_get("schema_summary")?,
            active: active_i != 0,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    fn row_to_principal(row: SqliteRow) -> Result<Principal, HubError> {
        let role_s: String = row.try_get("role")?;
        let role = Role::from_str(&role_s).map_err(|e| sqlx::Error::Decode(e.into()))?;
        let active_i: i64 = row.try_get("active")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Principal {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            key_hash: row.try_get("key_hash")?,
            role,
            active: active_i != 0,
            assigned_db: row.try_get("assigned_db")?,
            active_db_config: row.try_get("active_db_config")?,
            created_by: row.try_get("created_by")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, HubError> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc))
}
