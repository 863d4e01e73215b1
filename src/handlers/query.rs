use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::db::models::ConfigId;
use crate::error::HubError;
use crate::handlers::reply_error;
use crate::middleware::auth::AuthPrincipal;
use crate::router::HubState;
use crate::service::pool_manager::ResultRow;
use crate::service::safety_gate::Verdict;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub user_query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub sql: String,
    pub used_database: ConfigId,
    pub used_db_name: String,
}

pub async fn generate(
    State(state): State<HubState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let question = req.user_query.trim();
    if question.is_empty() {
        return HubError::InvalidInput("userQuery is required".to_string()).into_response();
    }
    match state.orchestrator.generate(&principal, question).await {
        Ok(out) => Json(GenerateResponse {
            sql: out.sql,
            used_database: out.config_id,
            used_db_name: out.database,
        })
        .into_response(),
        Err(e) => reply_error(&principal, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub sql: String,
}

/// Advisory only; `execute` validates again.
pub async fn validate(
    State(state): State<HubState>,
    AuthPrincipal(_principal): AuthPrincipal,
    Json(req): Json<ValidateRequest>,
) -> Json<Verdict> {
    Json(state.orchestrator.validate(&req.sql).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub sql: String,
    #[serde(default)]
    pub user_query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub result: Vec<ResultRow>,
    pub summary: String,
    pub executed_on: ConfigId,
    pub executed_on_db_name: String,
}

pub async fn execute(
    State(state): State<HubState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(req): Json<ExecuteRequest>,
) -> Response {
    match state
        .orchestrator
        .execute(&principal, req.user_query.trim(), &req.sql)
        .await
    {
        Ok(out) => Json(ExecuteResponse {
            result: out.rows,
            summary: out.summary,
            executed_on: out.config_id,
            executed_on_db_name: out.database,
        })
        .into_response(),
        Err(e) => reply_error(&principal, e),
    }
}
