pub mod auth;
pub mod db;
pub mod query;

use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::db::models::{Principal, Role};
use crate::error::{Exposed, HubError};

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Render `e` for `principal`: admins see the underlying reason, everyone
/// else the generic message.
pub(crate) fn reply_error(principal: &Principal, e: HubError) -> Response {
    match principal.role {
        Role::Admin => Exposed(e).into_response(),
        Role::User => e.into_response(),
    }
}
