use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};

use crate::db::models::{Principal, Role};
use crate::error::HubError;
use crate::router::HubState;

/// Any authenticated, active principal, loaded fresh from storage.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub Principal);

impl FromRequestParts<HubState> for AuthPrincipal {
    type Rejection = HubError;

    async fn from_request_parts(parts: &mut Parts, state: &HubState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| HubError::Authentication("missing bearer token".to_string()))?;

        let claims = state.tokens.verify(bearer.token())?;
        let principal = state
            .storage
            .get_principal(claims.principal_id()?)
            .await?
            .ok_or_else(|| HubError::Authentication("unknown principal".to_string()))?;
        claims.check_against(&principal)?;
        if !principal.active {
            return Err(HubError::Authorization("account is deactivated".to_string()));
        }
        Ok(Self(principal))
    }
}

/// An authenticated admin.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Principal);

impl FromRequestParts<HubState> for RequireAdmin {
    type Rejection = HubError;

    async fn from_request_parts(parts: &mut Parts, state: &HubState) -> Result<Self, Self::Rejection> {
        let AuthPrincipal(principal) = AuthPrincipal::from_request_parts(parts, state).await?;
        match principal.role {
            Role::Admin => Ok(Self(principal)),
            Role::User => Err(HubError::Authorization("admin role required".to_string())),
        }
    }
}
