use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

use crate::db::models::ConfigId;

#[derive(Debug, ThisError)]
pub enum HubError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Authorization(String),

    #[error("database config {0} not found")]
    ConfigNotFound(ConfigId),

    #[error("no database assigned or selected")]
    NoDatabaseAssigned,

    #[error("connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("schema introspection of {database} failed: {reason}")]
    Introspection { database: String, reason: String },

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("unsafe SQL rejected: {reason}")]
    UnsafeSqlRejected { reason: String },

    #[error("execution on {database} failed: {reason}")]
    Execution { database: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] SqlxError),
}

/// Transient failures worth another attempt. Only connection establishment
/// consults this; generated SQL is never retried.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SqlxError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            SqlxError::Io(_) | SqlxError::PoolTimedOut | SqlxError::Tls(_)
        )
    }
}

impl IsRetryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        self.is_timeout()
            || self.is_connect()
            || self.status().is_some_and(|s| s.is_server_error())
    }
}

impl HubError {
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Authentication(_) => "UNAUTHENTICATED",
            HubError::Authorization(_) => "FORBIDDEN",
            HubError::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            HubError::NoDatabaseAssigned => "NO_DATABASE_ASSIGNED",
            HubError::Connection { .. } => "CONNECTION_ERROR",
            HubError::Introspection { .. } => "INTROSPECTION_ERROR",
            HubError::Oracle(_) => "ORACLE_ERROR",
            HubError::UnsafeSqlRejected { .. } => "UNSAFE_SQL",
            HubError::Execution { .. } => "EXECUTION_ERROR",
            HubError::InvalidInput(_) => "INVALID_INPUT",
            HubError::Storage(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HubError::Authentication(_) => StatusCode::UNAUTHORIZED,
            HubError::Authorization(_) => StatusCode::FORBIDDEN,
            HubError::ConfigNotFound(_) => StatusCode::NOT_FOUND,
            HubError::NoDatabaseAssigned => StatusCode::CONFLICT,
            HubError::Connection { .. } | HubError::Oracle(_) => StatusCode::BAD_GATEWAY,
            HubError::Introspection { .. }
            | HubError::UnsafeSqlRejected { .. }
            | HubError::Execution { .. }
            | HubError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            HubError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe for any caller: driver and transport details are withheld.
    fn public_message(&self) -> String {
        match self {
            HubError::Connection { .. } => "Could not connect to the target database.".to_string(),
            HubError::Introspection { database, .. } => {
                format!("Could not read the schema of database `{database}`.")
            }
            HubError::Execution { database, .. } => {
                format!("The query failed on database `{database}`.")
            }
            HubError::Oracle(_) => "The language model service is unavailable.".to_string(),
            HubError::Storage(_) => "An internal server error occurred.".to_string(),
            other => other.to_string(),
        }
    }

    fn body(&self, expose: bool) -> ApiErrorResponse {
        let message = match self {
            HubError::Storage(_) => self.public_message(),
            _ if expose => self.to_string(),
            _ => self.public_message(),
        };
        let reason = match self {
            HubError::UnsafeSqlRejected { reason } => Some(reason.clone()),
            _ => None,
        };
        ApiErrorResponse {
            error: ApiErrorBody {
                code: self.code().to_string(),
                message,
                reason,
            },
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self.body(false))).into_response()
    }
}

/// Error rendered with its underlying reason; only handed to admin callers.
#[derive(Debug)]
pub struct Exposed(pub HubError);

impl From<HubError> for Exposed {
    fn from(e: HubError) -> Self {
        Exposed(e)
    }
}

impl IntoResponse for Exposed {
    fn into_response(self) -> axum::response::Response {
        (self.0.status(), Json(self.0.body(true))).into_response()
    }
}

/// Standardized API error response body
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_details_are_hidden_by_default() {
        let err = HubError::Execution {
            database: "salesdb".into(),
            reason: "Table 'salesdb.secret' doesn't exist".into(),
        };
        let body = serde_json::to_string(&err.body(false)).unwrap();
        assert!(body.contains("EXECUTION_ERROR"));
        assert!(body.contains("salesdb"));
        assert!(!body.contains("secret"));

        let exposed = serde_json::to_string(&err.body(true)).unwrap();
        assert!(exposed.contains("secret"));
    }

    #[test]
    fn unsafe_sql_carries_reason() {
        let err = HubError::UnsafeSqlRejected {
            reason: "DELETE without WHERE".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let body = serde_json::to_value(err.body(false)).unwrap();
        assert_eq!(body["error"]["code"], "UNSAFE_SQL");
        assert_eq!(body["error"]["reason"], "DELETE without WHERE");
    }

    #[test]
    fn storage_errors_never_leak() {
        let err = HubError::Storage(SqlxError::RowNotFound);
        let body = serde_json::to_value(err.body(true)).unwrap();
        assert_eq!(body["error"]["message"], "An internal server error occurred.");
    }

    #[test]
    fn only_transport_failures_retry() {
        assert!(SqlxError::PoolTimedOut.is_retryable());
        assert!(!SqlxError::RowNotFound.is_retryable());
    }
}
