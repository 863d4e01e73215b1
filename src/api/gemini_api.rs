use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::Oracle;
use crate::config::OracleConfig;
use crate::error::{HubError, IsRetryable};
use crate::service::pool_manager::ResultRow;
use crate::types::gemini::{GenerateRequest, GenerateResponse};

/// Rows shown to the summarizer; the total count is always included.
const SAMPLE_ROWS: usize = 5;

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// `Oracle` backed by the Gemini `generateContent` REST endpoint.
#[derive(Clone)]
pub struct GeminiOracle {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Arc<str>,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry_policy: ExponentialBuilder,
}

impl GeminiOracle {
    pub fn new(cfg: &OracleConfig) -> Result<Self, HubError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("nl2sql-hub/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(cfg.timeout());
        if let Some(proxy_url) = cfg.proxy.as_ref() {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .map_err(|e| HubError::InvalidInput(format!("invalid oracle proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| HubError::Oracle(format!("http client init failed: {e}")))?;

        let endpoint = Url::parse(&format!(
            "{}/models/{}:generateContent",
            cfg.base_url.as_str().trim_end_matches('/'),
            cfg.model
        ))
        .map_err(|e| HubError::InvalidInput(format!("invalid oracle endpoint: {e}")))?;

        let per_minute = NonZeroU32::new(cfg.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        Ok(Self {
            client,
            endpoint,
            api_key: Arc::from(cfg.api_key.as_str()),
            limiter,
            retry_policy: default_retry_policy(),
        })
    }

    async fn post(&self, body: &GenerateRequest) -> Result<reqwest::Response, reqwest::Error> {
        (|| async {
            let resp = self
                .client
                .post(self.endpoint.clone())
                .header("x-goog-api-key", self.api_key.as_ref())
                .json(body)
                .send()
                .await?;
            if resp.status().is_server_error() {
                warn!("Gemini server error (will retry): {}", resp.status());
                return resp.error_for_status();
            }
            Ok(resp)
        })
        .retry(self.retry_policy)
        .when(|e: &reqwest::Error| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("Gemini call retrying after error {}, sleeping {:?}", err, dur);
        })
        .await
    }

    async fn complete(&self, prompt: String) -> Result<String, HubError> {
        self.limiter.until_ready().await;

        let resp = self
            .post(&GenerateRequest::prompt(prompt))
            .await
            .map_err(|e| HubError::Oracle(format!("gemini request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            debug!(%status, detail = %detail, "gemini rejected request");
            return Err(HubError::Oracle(format!("gemini returned {status}")));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| HubError::Oracle(format!("malformed gemini response: {e}")))?;
        parsed
            .text()
            .ok_or_else(|| HubError::Oracle("gemini returned no text".to_string()))
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(
        &self,
        question: &str,
        schema_summary: &str,
        database: &str,
    ) -> Result<String, HubError> {
        self.complete(generate_prompt(question, schema_summary, database))
            .await
    }

    async fn classify(&self, sql: &str) -> Result<String, HubError> {
        self.complete(classify_prompt(sql)).await
    }

    async fn summarize(
        &self,
        question: &str,
        rows: &[ResultRow],
        sql: &str,
        schema_summary: &str,
    ) -> Result<String, HubError> {
        self.complete(summarize_prompt(question, rows, sql, schema_summary))
            .await
    }
}

fn generate_prompt(question: &str, schema_summary: &str, database: &str) -> String {
    format!(
        "You are an expert MySQL SQL generator.\n\
         \n\
         Rules:\n\
         1. Use ONLY the tables and columns from the schema below.\n\
         2. The target database is: {database}\n\
         3. Output ONLY one raw SQL statement. No markdown, explanations or comments.\n\
         4. Use proper JOIN syntax and WHERE clauses as needed.\n\
         \n\
         Database schema:\n\
         {schema_summary}\n\
         \n\
         User question:\n\
         \"{question}\"\n\
         \n\
         SQL:"
    )
}

fn classify_prompt(sql: &str) -> String {
    format!(
        "You are a SQL safety validator. Decide whether the SQL below is safe to run.\n\
         \n\
         Rules:\n\
         - SELECT, INSERT, UPDATE and DELETE are allowed.\n\
         - DROP, ALTER, TRUNCATE and CREATE are never allowed.\n\
         - DELETE and UPDATE must include a WHERE clause.\n\
         \n\
         Respond ONLY with a JSON object like:\n\
         {{\"safe\": true, \"reason\": \"short explanation\"}}\n\
         \n\
         SQL:\n\
         {sql}\n"
    )
}

fn summarize_prompt(
    question: &str,
    rows: &[ResultRow],
    sql: &str,
    schema_summary: &str,
) -> String {
    let sample = &rows[..rows.len().min(SAMPLE_ROWS)];
    let sample = serde_json::to_string_pretty(sample).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are a data analysis assistant.\n\
         \n\
         The user asked: \"{question}\"\n\
         \n\
         Database schema:\n\
         {schema_summary}\n\
         \n\
         SQL executed:\n\
         {sql}\n\
         \n\
         Sample results (first {SAMPLE_ROWS} rows):\n\
         {sample}\n\
         \n\
         Total rows returned: {total}\n\
         \n\
         Give a clear, factual summary in 2-3 sentences using the actual numbers. \
         Do not apologize or mention missing data.\n",
        total = rows.len()
    )
}
