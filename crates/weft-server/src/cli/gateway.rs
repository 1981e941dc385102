// crates/weft-server/src/cli/gateway.rs
// Gateway runner

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use weft::config::GatewayConfig;
use weft::gateway::state::GatewayState;
use weft::gateway::{create_metrics_router, create_router, spawn_tools_changed_forwarder, table};
use weft::http::create_shared_client;
use weft::store::{MemoryStore, Store};

use super::GatewayArgs;

pub fn resolve_config(args: &GatewayArgs) -> GatewayConfig {
    let mut config = GatewayConfig::from_env();
    config.addr = args.addr.clone();
    config.metrics_addr = args.metrics_addr.clone();
    if let Some(path) = &args.routes_file {
        config.routes_file = path.clone();
    }
    config.request_timeout = args.request_timeout;
    if args.mcp_enabled {
        config.mcp_enabled = true;
    }
    if args.namespace.is_some() {
        config.namespace = args.namespace.clone();
    }
    config
}

pub async fn run(args: GatewayArgs) -> Result<()> {
    let config = resolve_config(&args);
    // The standalone gateway keeps an empty store; deployments wire the
    // cluster-backed implementation in, dev mode shares the operator's.
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    run_with_store(config, store).await
}

pub async fn run_with_store(config: GatewayConfig, store: Arc<dyn Store>) -> Result<()> {
    let state = GatewayState::new(config.clone(), create_shared_client());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Initial table load; a missing file is not fatal, the watcher picks it
    // up once the operator publishes.
    if config.routes_file.exists() {
        state
            .table
            .load_from_file(&config.routes_file)
            .await
            .with_context(|| format!("loading {}", config.routes_file.display()))?;
    } else {
        tracing::warn!(
            path = %config.routes_file.display(),
            "routes file missing; starting with an empty table"
        );
    }
    let _table_watcher = table::spawn_file_watcher(
        Arc::clone(&state.table),
        config.routes_file.clone(),
        shutdown_rx.clone(),
    );

    let _agent_watcher = state.agents.spawn(store, shutdown_rx.clone());
    if config.mcp_enabled {
        let _notifier = spawn_tools_changed_forwarder(state.clone(), shutdown_rx.clone());
    }

    let metrics_addr = GatewayConfig::bind_addr(&config.metrics_addr)?;
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("binding metrics address {metrics_addr}"))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, create_metrics_router()).await {
            tracing::error!("metrics server failed: {e}");
        }
    });

    let addr = GatewayConfig::bind_addr(&config.addr)?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding gateway address {addr}"))?;
    tracing::info!(addr = %addr, mcp = config.mcp_enabled, "gateway listening");

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("gateway shutting down");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}
