use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::db::models::{ConfigId, DbConfigView};
use crate::error::Exposed;
use crate::handlers::{OkResponse, reply_error};
use crate::middleware::auth::{AuthPrincipal, RequireAdmin};
use crate::router::HubState;
use crate::service::catalog::{self, ConnectRequest};
use crate::service::resolver;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectBody {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub conn_string: Option<String>,
}

impl From<ConnectBody> for ConnectRequest {
    fn from(b: ConnectBody) -> Self {
        Self {
            name: b.name,
            host: b.host,
            port: b.port,
            user: b.user,
            password: b.password,
            database: b.database,
            conn_string: b.conn_string,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub ok: bool,
    pub config_id: ConfigId,
    pub schema_summary: String,
}

pub async fn connect(
    State(state): State<HubState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<ConnectBody>,
) -> Result<Json<ConnectResponse>, Exposed> {
    let cfg = ConnectRequest::from(body).into_new_config(admin.id)?;
    let (config_id, schema_summary) = catalog::register(&state.storage, &state.pools, cfg).await?;
    Ok(Json(ConnectResponse {
        ok: true,
        config_id,
        schema_summary,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConfigList {
    pub configs: Vec<DbConfigView>,
}

pub async fn list_configs(
    State(state): State<HubState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<ConfigList>, Exposed> {
    let configs = state.storage.list_configs().await?;
    Ok(Json(ConfigList {
        configs: configs.iter().map(DbConfigView::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveResponse {
    pub active_db_config: DbConfigView,
    pub active_db_id: ConfigId,
}

/// The config the caller's queries would run on right now.
pub async fn active_config(
    State(state): State<HubState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Response {
    match resolver::resolve(&state.storage, &principal).await {
        Ok(cfg) => Json(ActiveResponse {
            active_db_id: cfg.id,
            active_db_config: DbConfigView::from(&cfg),
        })
        .into_response(),
        Err(e) => reply_error(&principal, e),
    }
}

/// Legacy: move the global default used by admins with no personal choice.
pub async fn activate_global(
    State(state): State<HubState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<ConfigId>,
) -> Result<Json<OkResponse>, Exposed> {
    state.storage.set_global_active(id).await?;
    tracing::info!(config_id = id, "global active database changed");
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveResponse {
    pub ok: bool,
    pub active_db_config: DbConfigView,
}

pub async fn set_active(
    State(state): State<HubState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<ConfigId>,
) -> Result<Json<SetActiveResponse>, Exposed> {
    let cfg = resolver::set_active(&state.storage, &admin, id).await?;
    Ok(Json(SetActiveResponse {
        ok: true,
        active_db_config: DbConfigView::from(&cfg),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub ok: bool,
    pub schema_summary: String,
}

pub async fn refresh_schema(
    State(state): State<HubState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<ConfigId>,
) -> Result<Json<RefreshResponse>, Exposed> {
    let schema_summary = catalog::refresh(&state.storage, &state.pools, id).await?;
    Ok(Json(RefreshResponse {
        ok: true,
        schema_summary,
    }))
}

pub async fn delete_config(
    State(state): State<HubState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<ConfigId>,
) -> Result<Json<OkResponse>, Exposed> {
    catalog::remove(&state.storage, &state.pools, id).await?;
    Ok(Json(OkResponse { ok: true }))
}
