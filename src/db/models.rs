use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ConfigId = i64;
pub type PrincipalId = i64;

/// Wire protocol of a tenant database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    MySql,
    Sqlite,
}

impl DbEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::MySql => "mysql",
            DbEngine::Sqlite => "sqlite",
        }
    }
}

impl FromStr for DbEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(DbEngine::MySql),
            "sqlite" => Ok(DbEngine::Sqlite),
            other => Err(format!("unknown engine `{other}`")),
        }
    }
}

/// A stored connection profile. `password` holds vault output, never plaintext.
#[derive(Debug, Clone, PartialEq)]
pub struct DbConfig {
    pub id: ConfigId,
    pub name: String,
    pub owner: PrincipalId,
    pub engine: DbEngine,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub conn_string: Option<String>,
    pub schema_summary: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl DbConfig {
    /// Name shown to callers next to generated SQL and results.
    pub fn database_label(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.name)
    }
}

/// A config that has not been persisted yet; `password` is still plaintext.
#[derive(Debug, Clone)]
pub struct NewDbConfig {
    pub name: String,
    pub owner: PrincipalId,
    pub engine: DbEngine,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub conn_string: Option<String>,
}

/// Password-free projection returned by the listing endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbConfigView {
    pub id: ConfigId,
    pub name: String,
    pub owner: PrincipalId,
    pub engine: DbEngine,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub database: Option<String>,
    pub conn_string: Option<String>,
    pub schema_summary: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&DbConfig> for DbConfigView {
    fn from(c: &DbConfig) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            owner: c.owner,
            engine: c.engine,
            host: c.host.clone(),
            port: c.port,
            user: c.user.clone(),
            database: c.database.clone(),
            conn_string: c.conn_string.clone(),
            schema_summary: c.schema_summary.clone(),
            active: c.active,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    pub key_hash: String,
    pub role: Role,
    pub active: bool,
    /// Fixed database of a restricted user; written once at creation.
    pub assigned_db: Option<ConfigId>,
    /// Personal working database of an admin.
    pub active_db_config: Option<ConfigId>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub key_hash: String,
    pub role: Role,
    pub assigned_db: Option<ConfigId>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalView {
    pub id: PrincipalId,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub assigned_db: Option<ConfigId>,
    pub active_db_config: Option<ConfigId>,
}

impl From<&Principal> for PrincipalView {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id,
            email: p.email.clone(),
            role: p.role,
            active: p.active,
            assigned_db: p.assigned_db,
            active_db_config: p.active_db_config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_roles_do_not_parse() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("user".parse::<Role>(), Ok(Role::User));
        assert!("Admin".parse::<Role>().is_err());
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn view_omits_password() {
        let cfg = DbConfig {
            id: 1,
            name: "sales".into(),
            owner: 1,
            engine: DbEngine::MySql,
            host: Some("db1".into()),
            port: 3306,
            user: Some("a".into()),
            password: Some("c1phertext".into()),
            database: Some("salesdb".into()),
            conn_string: None,
            schema_summary: "orders(id (int))".into(),
            active: true,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&DbConfigView::from(&cfg)).unwrap();
        assert!(!json.contains("c1phertext"));
        assert!(json.contains("\"schemaSummary\""));
        assert_eq!(cfg.database_label(), "salesdb");
    }
}
