//! omx-runtime entry point.
//!
//! Intentionally thin: tracing, config, pool, migrations, runtime start,
//! ctrl-c, graceful shutdown. Transports (REST, message listeners) are
//! separate processes/collaborators that hold a `CommandGateway`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file
    // does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = match std::env::var("OMX_CONFIG") {
        Ok(paths) => {
            let paths: Vec<&str> = paths.split(',').map(str::trim).collect();
            omx_config::load_layered_yaml(&paths).context("load OMX_CONFIG")?
        }
        Err(_) => {
            info!("OMX_CONFIG not set; running with built-in defaults");
            omx_config::LoadedConfig {
                config: omx_config::OmxConfig::default(),
                canonical_json: "{}".to_string(),
                config_hash: "default".to_string(),
            }
        }
    };
    info!(config_hash = %loaded.config_hash, "configuration loaded");

    let pool = omx_store::connect_from_env_with_pool_size(loaded.config.db.pool_size).await?;
    omx_store::migrate(&pool).await?;
    let status = omx_store::status(&pool).await?;
    info!(
        db_ok = status.ok,
        has_orders_table = status.has_orders_table,
        "database ready"
    );

    let runtime = omx_runtime::start(&loaded.config, pool, Arc::new(omx_runtime::LogBus)).await?;

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown signal received");
    runtime.shutdown().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
