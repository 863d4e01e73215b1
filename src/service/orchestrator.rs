//! Drives a question through resolve, generate, validate, execute and
//! summarize. Each stage runs in its own span; a failure at any stage ends the
//! request with a typed error and nothing past that stage happens.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::api::{Oracle, sanitize_sql};
use crate::db::models::{ConfigId, DbConfig, Principal};
use crate::db::sqlite::HubStorage;
use crate::error::HubError;
use crate::service::pool_manager::{PoolManager, ResultRow};
use crate::service::resolver;
use crate::service::safety_gate::{SafetyGate, Verdict};

pub const SUMMARY_FALLBACK: &str = "Failed to summarize result.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Generating,
    Validating,
    Executing,
    Summarizing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolving => "resolving",
            Stage::Generating => "generating",
            Stage::Validating => "validating",
            Stage::Executing => "executing",
            Stage::Summarizing => "summarizing",
            Stage::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub config_id: ConfigId,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub rows: Vec<ResultRow>,
    pub summary: String,
    pub config_id: ConfigId,
    pub database: String,
}

#[derive(Clone)]
pub struct QueryOrchestrator {
    storage: HubStorage,
    pools: PoolManager,
    oracle: Arc<dyn Oracle>,
    gate: SafetyGate,
    oracle_timeout: Duration,
}

impl QueryOrchestrator {
    pub fn new(
        storage: HubStorage,
        pools: PoolManager,
        oracle: Arc<dyn Oracle>,
        gate: SafetyGate,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            pools,
            oracle,
            gate,
            oracle_timeout,
        }
    }

    async fn resolve(&self, principal: &Principal) -> Result<DbConfig, HubError> {
        let span = info_span!("stage", stage = Stage::Resolving.as_str(), principal_id = principal.id);
        resolver::resolve(&self.storage, principal)
            .instrument(span)
            .await
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, HubError>>,
    ) -> Result<T, HubError> {
        match tokio::time::timeout(self.oracle_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(HubError::Oracle(format!(
                "{what} timed out after {:?}",
                self.oracle_timeout
            ))),
        }
    }

    /// Translate a question into SQL for the principal's database. The SQL is
    /// not executed and not trusted by `execute`.
    pub async fn generate(
        &self,
        principal: &Principal,
        question: &str,
    ) -> Result<GeneratedSql, HubError> {
        let cfg = self.resolve(principal).await?;
        let database = cfg.database_label().to_string();

        let span = info_span!(
            "stage",
            stage = Stage::Generating.as_str(),
            principal_id = principal.id,
            config_id = cfg.id,
            database = %database
        );
        let raw = self
            .bounded(
                "generation",
                self.oracle.generate(question, &cfg.schema_summary, &database),
            )
            .instrument(span)
            .await
            .inspect_err(|e| warn!(config_id = cfg.id, error = %e, "sql generation failed"))?;

        let sql = sanitize_sql(&raw);
        if sql.is_empty() {
            return Err(HubError::Oracle("generation produced no SQL".to_string()));
        }
        debug!(config_id = cfg.id, %database, "sql generated");
        Ok(GeneratedSql {
            sql,
            config_id: cfg.id,
            database,
        })
    }

    pub async fn validate(&self, sql: &str) -> Verdict {
        let span = info_span!("stage", stage = Stage::Validating.as_str());
        self.gate.classify(sql).instrument(span).await
    }

    /// Re-validate `sql`, run it on the principal's freshly resolved database
    /// and summarize the rows.
    pub async fn execute(
        &self,
        principal: &Principal,
        question: &str,
        sql: &str,
    ) -> Result<Execution, HubError> {
        let cfg = self.resolve(principal).await?;
        let database = cfg.database_label().to_string();
        let sql = sql.trim();

        let verdict = self
            .gate
            .classify(sql)
            .instrument(info_span!(
                "stage",
                stage = Stage::Validating.as_str(),
                principal_id = principal.id,
                config_id = cfg.id,
                database = %database
            ))
            .await;
        let kind = match (verdict.safe, verdict.kind) {
            (true, Some(kind)) => kind,
            _ => {
                warn!(
                    principal_id = principal.id,
                    config_id = cfg.id,
                    reason = %verdict.reason,
                    "unsafe sql rejected"
                );
                return Err(HubError::UnsafeSqlRejected {
                    reason: verdict.reason,
                });
            }
        };

        let exec_span = info_span!(
            "stage",
            stage = Stage::Executing.as_str(),
            principal_id = principal.id,
            config_id = cfg.id,
            database = %database
        );
        let rows = async {
            let pool = self.pools.acquire(&cfg).await?;
            pool.execute(sql, kind)
                .await
                .map_err(|e| HubError::Execution {
                    database: database.clone(),
                    reason: e.to_string(),
                })
        }
        .instrument(exec_span)
        .await
        .inspect_err(|e| warn!(config_id = cfg.id, error = %e, "execution failed"))?;

        let summary = match self
            .bounded(
                "summarization",
                self.oracle
                    .summarize(question, &rows, sql, &cfg.schema_summary),
            )
            .instrument(info_span!(
                "stage",
                stage = Stage::Summarizing.as_str(),
                principal_id = principal.id,
                config_id = cfg.id,
                database = %database
            ))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!(config_id = cfg.id, "summarizer returned empty text");
                SUMMARY_FALLBACK.to_string()
            }
            Err(e) => {
                warn!(config_id = cfg.id, error = %e, "summarization failed after execution");
                SUMMARY_FALLBACK.to_string()
            }
        };

        info!(
            principal_id = principal.id,
            config_id = cfg.id,
            %database,
            rows = rows.len(),
            stage = Stage::Done.as_str(),
            "query executed"
        );
        Ok(Execution {
            rows,
            summary,
            config_id: cfg.id,
            database,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DbEngine, NewDbConfig, NewPrincipal, Role};
    use crate::db::sqlite::tests::memory_storage;
    use crate::service::pool_manager::tests::tenant_file;
    use crate::service::vault::CredentialVault;
    use crate::config::{PoolConfig, VaultConfig};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    struct Scripted {
        sql: String,
        fail_summary: bool,
        seen_rows: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Oracle for Scripted {
        async fn generate(&self, _: &str, _: &str, _: &str) -> Result<String, HubError> {
            Ok(self.sql.clone())
        }

        async fn classify(&self, _: &str) -> Result<String, HubError> {
            Ok(r#"{"safe": true, "reason": "ok"}"#.to_string())
        }

        async fn summarize(
            &self,
            _: &str,
            rows: &[ResultRow],
            _: &str,
            _: &str,
        ) -> Result<String, HubError> {
            self.seen_rows.lock().unwrap().push(rows.len());
            if self.fail_summary {
                return Err(HubError::Oracle("boom".into()));
            }
            Ok(format!("There are {} rows.", rows.len()))
        }
    }

    async fn setup(
        sql: &str,
        fail_summary: bool,
    ) -> (QueryOrchestrator, Principal, Arc<Scripted>, std::path::PathBuf) {
        let path = tenant_file("orch", 3).await;
        let storage = memory_storage().await;
        let id = storage
            .insert_config_as_active(
                NewDbConfig {
                    name: "sales".into(),
                    owner: 1,
                    engine: DbEngine::Sqlite,
                    host: None,
                    port: 0,
                    user: None,
                    password: None,
                    database: Some("salesdb".into()),
                    conn_string: Some(format!("sqlite://{}", path.display())),
                },
                "orders(id (INTEGER), customer (TEXT), total (REAL))",
            )
            .await
            .unwrap();
        let pid = storage
            .insert_principal(NewPrincipal {
                email: "u@example.com".into(),
                key_hash: "h".into(),
                role: Role::User,
                assigned_db: Some(id),
                created_by: None,
            })
            .await
            .unwrap();
        let principal = storage.get_principal(pid).await.unwrap().unwrap();

        let oracle = Arc::new(Scripted {
            sql: sql.to_string(),
            fail_summary,
            seen_rows: Mutex::new(Vec::new()),
        });
        let vault = CredentialVault::new(&VaultConfig::default()).unwrap();
        let pools = PoolManager::new(vault, PoolConfig::default());
        let orch = QueryOrchestrator::new(
            storage,
            pools,
            oracle.clone(),
            SafetyGate::with_oracle(oracle.clone(), Duration::from_secs(5)),
            Duration::from_secs(5),
        );
        (orch, principal, oracle, path)
    }

    #[tokio::test]
    async fn generated_sql_is_sanitized_and_labelled() {
        let (orch, principal, _, path) =
            setup("```sql\nSELECT COUNT(*) AS n FROM orders -- count\n```", false).await;
        let generated = orch.generate(&principal, "how many rows in orders").await.unwrap();
        assert_eq!(generated.sql, "SELECT COUNT(*) AS n FROM orders");
        assert_eq!(generated.database, "salesdb");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn empty_generation_is_an_oracle_error() {
        let (orch, principal, _, path) = setup("-- no idea", false).await;
        let err = orch.generate(&principal, "?").await.unwrap_err();
        assert!(matches!(err, HubError::Oracle(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn execution_runs_and_summarizes() {
        let (orch, principal, _, path) = setup("", false).await;
        let out = orch
            .execute(&principal, "how many rows in orders", "SELECT COUNT(*) AS n FROM orders")
            .await
            .unwrap();
        assert_eq!(out.rows[0]["n"], Value::from(3));
        assert_eq!(out.summary, "There are 1 rows.");
        assert_eq!(out.database, "salesdb");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unsafe_sql_never_reaches_the_database() {
        let (orch, principal, oracle, path) = setup("", false).await;
        let err = orch
            .execute(&principal, "wipe it", "DELETE FROM orders")
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::UnsafeSqlRejected { .. }));
        assert!(oracle.seen_rows.lock().unwrap().is_empty());

        let out = orch
            .execute(&principal, "count", "SELECT COUNT(*) AS n FROM orders")
            .await
            .unwrap();
        assert_eq!(out.rows[0]["n"], Value::from(3));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn statements_smuggled_behind_quoted_comment_markers_are_refused() {
        let (orch, principal, oracle, path) = setup("", false).await;
        for sql in [
            "SELECT '/*' AS a FROM orders; DROP TABLE orders; SELECT '*/' AS b",
            "SELECT '/*' AS a FROM orders; DELETE FROM orders WHERE 1 = 1; SELECT '*/' AS b",
            "UPDATE orders SET customer = 'where'",
        ] {
            let err = orch.execute(&principal, "?", sql).await.unwrap_err();
            assert!(matches!(err, HubError::UnsafeSqlRejected { .. }), "{sql}: {err:?}");
        }
        assert!(oracle.seen_rows.lock().unwrap().is_empty());

        let out = orch
            .execute(&principal, "count", "SELECT COUNT(*) AS n FROM orders WHERE customer <> 'where'")
            .await
            .unwrap();
        assert_eq!(out.rows[0]["n"], Value::from(3));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn summary_failure_after_execution_falls_back() {
        let (orch, principal, _, path) = setup("", true).await;
        let out = orch
            .execute(&principal, "delete one", "DELETE FROM orders WHERE id = 1")
            .await
            .unwrap();
        assert_eq!(out.rows[0]["affectedRows"], Value::from(1));
        assert_eq!(out.summary, SUMMARY_FALLBACK);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn sql_errors_are_execution_errors() {
        let (orch, principal, _, path) = setup("", false).await;
        let err = orch
            .execute(&principal, "?", "SELECT * FROM no_such_table")
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Execution { ref database, .. } if database == "salesdb"));
        let _ = std::fs::remove_file(&path);
    }
}
