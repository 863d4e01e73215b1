use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::models::{ConfigId, NewPrincipal, PrincipalId, PrincipalView, Role};
use crate::error::{Exposed, HubError};
use crate::handlers::OkResponse;
use crate::middleware::auth::{AuthPrincipal, RequireAdmin};
use crate::router::HubState;
use crate::service::tokens::{generate_key, hash_key, key_matches};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct LoginUser {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}

pub async fn login(
    State(state): State<HubState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, HubError> {
    let invalid = || HubError::Authentication("invalid email or key".to_string());

    let principal = state
        .storage
        .get_principal_by_email(&req.email.trim().to_lowercase())
        .await?
        .ok_or_else(invalid)?;
    if !key_matches(&req.key, &principal.key_hash) {
        return Err(invalid());
    }
    if !principal.active {
        return Err(HubError::Authorization("account is deactivated".to_string()));
    }

    let token = state.tokens.issue(&principal)?;
    info!(principal_id = principal.id, role = %principal.role, "login");
    Ok(Json(LoginResponse {
        token,
        user: LoginUser {
            email: principal.email,
            role: principal.role,
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub assigned_db: Option<ConfigId>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub ok: bool,
    pub id: PrincipalId,
    /// Plaintext access key; never retrievable again.
    pub key: String,
}

pub async fn create_user(
    State(state): State<HubState>,
    RequireAdmin(admin): RequireAdmin,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, Exposed> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(HubError::InvalidInput("a valid email is required".to_string()).into());
    }
    if state.storage.get_principal_by_email(&email).await?.is_some() {
        return Err(HubError::InvalidInput(format!("{email} is already registered")).into());
    }

    let role = req.role.unwrap_or(Role::User);
    let assigned_db = match role {
        Role::User => match req.assigned_db {
            Some(id) => Some(state.storage.get_config(id).await?.id),
            None => None,
        },
        Role::Admin => None,
    };

    let key = generate_key();
    let id = state
        .storage
        .insert_principal(NewPrincipal {
            email: email.clone(),
            key_hash: hash_key(&key),
            role,
            assigned_db,
            created_by: Some(admin.email.clone()),
        })
        .await?;
    info!(principal_id = id, %role, created_by = admin.id, "principal created");
    Ok(Json(CreateUserResponse { ok: true, id, key }))
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    pub email: String,
}

pub async fn deactivate_user(
    State(state): State<HubState>,
    RequireAdmin(admin): RequireAdmin,
    Json(req): Json<DeactivateRequest>,
) -> Result<Json<OkResponse>, Exposed> {
    let email = req.email.trim().to_lowercase();
    let target = state
        .storage
        .get_principal_by_email(&email)
        .await?
        .ok_or_else(|| HubError::InvalidInput(format!("no principal with email {email}")))?;
    match target.role {
        Role::Admin => {
            return Err(HubError::Authorization("admins cannot be deactivated".to_string()).into());
        }
        Role::User => {}
    }
    state.storage.set_principal_active(target.id, false).await?;
    info!(principal_id = target.id, by = admin.id, "principal deactivated");
    Ok(Json(OkResponse { ok: true }))
}

pub async fn me(AuthPrincipal(principal): AuthPrincipal) -> Json<PrincipalView> {
    Json(PrincipalView::from(&principal))
}
