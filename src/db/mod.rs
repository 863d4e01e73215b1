//! Control-plane persistence.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows and their API views
//! - `schema.rs`: SQL DDL applied at startup (SQLite)
//! - `sqlite.rs`: `HubStorage`, the typed access layer

pub mod models;
pub mod schema;
pub mod sqlite;

pub use schema::SQLITE_INIT;
pub use sqlite::{HubStorage, SqlitePool};
