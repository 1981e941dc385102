// crates/weft-server/src/cli/dev.rs
// Single-process mode: operator + gateway over one in-memory store

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

use weft::reconcile;
use weft::store::{MemoryStore, Store};

use super::{gateway, operator, DevArgs};

pub async fn run(args: DevArgs) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    if let Some(seed) = &args.seed {
        let count = operator::seed_store(&store, seed).await?;
        tracing::info!(count, dir = %seed.display(), "seeded store");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controllers =
        operator::spawn_controllers(store.clone() as Arc<dyn Store>, shutdown_rx.clone()).await?;
    let _resync = store.spawn_resync(reconcile::RESYNC_PERIOD, shutdown_rx.clone());

    // Route the compiled blob through a real file so the gateway exercises
    // its production reload path.
    let mut config = gateway::resolve_config(&args.gateway);
    if args.gateway.routes_file.is_none() {
        config.routes_file = std::env::temp_dir().join("weft-dev-routes.json");
    }
    let _mirror = operator::spawn_routes_mirror(
        store.clone() as Arc<dyn Store>,
        config.routes_file.clone(),
        None,
        shutdown_rx.clone(),
    );

    // The gateway's serve loop owns ctrl-c handling.
    let result = serve_gateway(config, store.clone()).await;

    let _ = shutdown_tx.send(true);
    for controller in controllers {
        controller.join().await;
    }
    result
}

async fn serve_gateway(
    config: weft::config::GatewayConfig,
    store: Arc<MemoryStore>,
) -> Result<()> {
    gateway::run_with_store(config, store as Arc<dyn Store>).await
}
