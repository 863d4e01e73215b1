//! Decides which stored config a principal's request runs against.

use tracing::debug;

use crate::db::models::{ConfigId, DbConfig, Principal, Role};
use crate::db::sqlite::HubStorage;
use crate::error::HubError;

/// The config id a principal would use right now, without loading it.
pub async fn resolve_id(storage: &HubStorage, principal: &Principal) -> Result<ConfigId, HubError> {
    if !principal.active {
        return Err(HubError::Authorization("account is deactivated".to_string()));
    }

    match principal.role {
        Role::User => principal.assigned_db.ok_or(HubError::NoDatabaseAssigned),
        Role::Admin => match principal.active_db_config {
            Some(id) => Ok(id),
            None => storage
                .global_active_id()
                .await?
                .ok_or(HubError::NoDatabaseAssigned),
        },
    }
}

/// Resolve and re-fetch the principal's config from storage.
pub async fn resolve(storage: &HubStorage, principal: &Principal) -> Result<DbConfig, HubError> {
    let id = resolve_id(storage, principal).await?;
    let cfg = storage.get_config(id).await?;
    debug!(
        principal_id = principal.id,
        config_id = cfg.id,
        database = %cfg.database_label(),
        "resolved working database"
    );
    Ok(cfg)
}

/// Point an admin's personal working database at `config`. Only that admin's
/// own resolution changes.
pub async fn set_active(
    storage: &HubStorage,
    principal: &Principal,
    config: ConfigId,
) -> Result<DbConfig, HubError> {
    if !principal.active {
        return Err(HubError::Authorization("account is deactivated".to_string()));
    }
    match principal.role {
        Role::Admin => {}
        Role::User => {
            return Err(HubError::Authorization(
                "restricted users cannot change their database".to_string(),
            ));
        }
    }
    let cfg = storage.get_config(config).await?;
    storage.set_personal_active(principal.id, cfg.id).await?;
    Ok(cfg)
}
