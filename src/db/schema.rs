//! SQL DDL for initializing the control-plane storage (SQLite).

/// SQLite schema with:
/// - `db_configs`: tenant connection profiles; `password` holds vault ciphertext
/// - partial UNIQUE index on `active` so at most one row is the global default
/// - `principals`: admins and restricted users; `key_hash` is SHA-256 hex of the access key
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS db_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    owner INTEGER NOT NULL,
    engine TEXT NOT NULL DEFAULT 'mysql',
    host TEXT NULL,
    port INTEGER NOT NULL DEFAULT 3306,
    user TEXT NULL,
    password TEXT NULL,
    database_name TEXT NULL,
    conn_string TEXT NULL,
    schema_summary TEXT NOT NULL DEFAULT '',
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL -- RFC3339
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_db_configs_single_active
    ON db_configs(active) WHERE active = 1;

CREATE TABLE IF NOT EXISTS principals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    key_hash TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('admin', 'user')),
    active INTEGER NOT NULL DEFAULT 1,
    assigned_db INTEGER NULL,
    active_db_config INTEGER NULL,
    created_by TEXT NULL,
    created_at TEXT NOT NULL -- RFC3339
);
"#;
