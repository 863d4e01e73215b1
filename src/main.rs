use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nl2sql_hub::api::{GeminiOracle, Oracle};
use nl2sql_hub::db::HubStorage;
use nl2sql_hub::router::{HubState, hub_router};
use nl2sql_hub::service::pool_manager::PoolManager;
use nl2sql_hub::service::tokens::hash_key;
use nl2sql_hub::service::vault::CredentialVault;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &nl2sql_hub::config::CONFIG;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.basic.database_url,
        listen_addr = %cfg.basic.listen_addr,
        loglevel = %cfg.basic.loglevel,
        model = %cfg.oracle.model,
        proxy = %cfg.oracle.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        max_connections = cfg.pool.max_connections,
        oracle_second_opinion = cfg.safety.use_oracle,
    );
    let defaults = cfg.default_secrets();
    if !defaults.is_empty() {
        if !cfg.basic.allow_default_secrets {
            error!(secrets = ?defaults, "built-in secrets in use; set them or HUB_BASIC__ALLOW_DEFAULT_SECRETS=true");
            return Err(format!("refusing to start with built-in {}", defaults.join(", ")).into());
        }
        warn!(secrets = ?defaults, "built-in secrets in use; tenant passwords and tokens are not protected");
    }
    if cfg.oracle.api_key.is_empty() {
        warn!("oracle.api_key is empty; generation requests will fail");
    }

    let vault = CredentialVault::new(&cfg.vault)?;
    let storage = HubStorage::connect(&cfg.basic.database_url, vault.clone()).await?;

    if let (Some(email), Some(key)) = (cfg.basic.admin_email.as_ref(), cfg.basic.admin_key.as_ref()) {
        let email = email.trim().to_lowercase();
        match storage.ensure_admin(&email, &hash_key(key)).await? {
            Some(id) => info!(principal_id = id, %email, "bootstrap admin created"),
            None => info!(%email, "bootstrap admin already present"),
        }
    }

    let pools = PoolManager::new(vault, cfg.pool.clone());
    let oracle: Arc<dyn Oracle> = Arc::new(GeminiOracle::new(&cfg.oracle)?);
    let state = HubState::new(storage, pools.clone(), oracle, cfg);
    let app = hub_router(state);

    let listener = TcpListener::bind(cfg.basic.listen_addr.as_str()).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        })
        .await?;

    pools.shutdown().await;
    info!("tenant pools closed");
    Ok(())
}
