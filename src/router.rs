use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use std::sync::Arc;

use crate::api::Oracle;
use crate::config::Config;
use crate::db::sqlite::HubStorage;
use crate::handlers::{auth, db, query};
use crate::service::orchestrator::QueryOrchestrator;
use crate::service::pool_manager::PoolManager;
use crate::service::safety_gate::SafetyGate;
use crate::service::tokens::TokenIssuer;

const BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct HubState {
    pub storage: HubStorage,
    pub pools: PoolManager,
    pub orchestrator: QueryOrchestrator,
    pub tokens: TokenIssuer,
}

impl HubState {
    pub fn new(
        storage: HubStorage,
        pools: PoolManager,
        oracle: Arc<dyn Oracle>,
        cfg: &Config,
    ) -> Self {
        let gate = if cfg.safety.use_oracle {
            SafetyGate::with_oracle(oracle.clone(), cfg.oracle.timeout())
        } else {
            SafetyGate::rules_only()
        };
        let orchestrator = QueryOrchestrator::new(
            storage.clone(),
            pools.clone(),
            oracle,
            gate,
            cfg.oracle.timeout(),
        );
        Self {
            storage,
            pools,
            orchestrator,
            tokens: TokenIssuer::new(&cfg.auth),
        }
    }
}

pub fn hub_router(state: HubState) -> Router {
    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/users", post(auth::create_user))
        .route("/auth/users/deactivate", post(auth::deactivate_user))
        .route("/auth/me", get(auth::me))
        .route("/db", get(db::list_configs))
        .route("/db/connect", post(db::connect))
        .route("/db/active", get(db::active_config))
        .route("/db/activate/{id}", post(db::activate_global))
        .route("/db/set-active/{id}", post(db::set_active))
        .route("/db/{id}/refresh", post(db::refresh_schema))
        .route("/db/{id}", delete(db::delete_config))
        .route("/api/query/generate", post(query::generate))
        .route("/api/query/validate", post(query::validate))
        .route("/api/query/execute", post(query::execute))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}
