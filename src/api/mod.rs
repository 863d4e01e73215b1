//! The text oracle the hub delegates generation, classification and
//! summarization to, plus the sanitizer applied to anything it returns.

pub mod gemini_api;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::HubError;
use crate::service::pool_manager::ResultRow;

pub use gemini_api::GeminiOracle;

/// An untrusted text producer. Every output is sanitized or parsed
/// fail-closed by the caller.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Natural-language question to SQL text for `database`.
    async fn generate(
        &self,
        question: &str,
        schema_summary: &str,
        database: &str,
    ) -> Result<String, HubError>;

    /// Raw verdict text; expected to contain `{"safe": bool, "reason": "..."}`.
    async fn classify(&self, sql: &str) -> Result<String, HubError>;

    async fn summarize(
        &self,
        question: &str,
        rows: &[ResultRow],
        sql: &str,
        schema_summary: &str,
    ) -> Result<String, HubError>;
}

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:sql)?").expect("valid regex"));
static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)--.*$").expect("valid regex"));

/// Strip code fences and `--` comments from generated SQL.
pub fn sanitize_sql(raw: &str) -> String {
    let unfenced = SQL_FENCE.replace_all(raw, "");
    LINE_COMMENT.replace_all(&unfenced, "").trim().to_string()
}
