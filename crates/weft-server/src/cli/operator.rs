// crates/weft-server/src/cli/operator.rs
// Operator runner: controllers + store plumbing

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use weft::reconcile::{
    self, AgentReconciler, Controller, RouteReconciler, TaskReconciler, ToolReconciler,
};
use weft::reconcile::route::{ROUTES_BLOB_KEY, ROUTES_BLOB_NAME};
use weft::store::{MemoryStore, Object, Store, WatchEvent};
use weft_types::ResourceKind;

use super::OperatorArgs;

/// Workers per controller pool.
const WORKERS: usize = 2;

pub async fn run(args: OperatorArgs) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    if let Some(seed) = &args.seed {
        let count = seed_store(&store, seed).await?;
        tracing::info!(count, dir = %seed.display(), "seeded store");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controllers = spawn_controllers(
        store.clone() as Arc<dyn Store>,
        shutdown_rx.clone(),
    )
    .await?;
    let _resync = store.spawn_resync(reconcile::RESYNC_PERIOD, shutdown_rx.clone());

    if let Some(routes_file) = args.routes_file.clone() {
        let _mirror = spawn_routes_mirror(
            store.clone() as Arc<dyn Store>,
            routes_file,
            args.namespace.clone(),
            shutdown_rx.clone(),
        );
    }

    tracing::info!("operator running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("operator shutting down");
    let _ = shutdown_tx.send(true);
    for controller in controllers {
        controller.join().await;
    }
    Ok(())
}

/// Start the four controllers and prime them with existing objects.
pub async fn spawn_controllers(
    store: Arc<dyn Store>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<Controller>> {
    let tool = Arc::new(ToolReconciler::new(Arc::clone(&store)));
    let agent = Arc::new(AgentReconciler::new(Arc::clone(&store)));
    let route = Arc::new(RouteReconciler::new(Arc::clone(&store)));
    let task = Arc::new(TaskReconciler::new(Arc::clone(&store)));

    let controllers = vec![
        {
            let c = Controller::spawn(Arc::clone(&store), Arc::clone(&tool), WORKERS, shutdown.clone());
            reconcile::prime(&store, &tool, &c).await?;
            c
        },
        {
            let c = Controller::spawn(Arc::clone(&store), Arc::clone(&agent), WORKERS, shutdown.clone());
            reconcile::prime(&store, &agent, &c).await?;
            c
        },
        {
            let c = Controller::spawn(Arc::clone(&store), Arc::clone(&route), WORKERS, shutdown.clone());
            reconcile::prime(&store, &route, &c).await?;
            c
        },
        {
            let c = Controller::spawn(Arc::clone(&store), Arc::clone(&task), WORKERS, shutdown.clone());
            reconcile::prime(&store, &task, &c).await?;
            c
        },
    ];
    Ok(controllers)
}

/// Load every `.json` resource file under a directory into the store. Each
/// file holds one object or an array of objects in the store's tagged form,
/// e.g. `{"Agent": {"metadata": ..., "spec": ...}}`.
pub async fn seed_store(store: &Arc<MemoryStore>, dir: &Path) -> Result<usize> {
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading seed dir {}", dir.display()))?;
    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let content = tokio::fs::read_to_string(&path).await?;
        let objects: Vec<Object> = match serde_json::from_str::<Vec<Object>>(&content) {
            Ok(objects) => objects,
            Err(_) => vec![serde_json::from_str::<Object>(&content)
                .with_context(|| format!("parsing seed file {}", path.display()))?],
        };
        for obj in objects {
            store
                .create(obj)
                .await
                .with_context(|| format!("seeding from {}", path.display()))?;
            count += 1;
        }
    }
    Ok(count)
}

/// Mirror the compiled route blob to the gateway's routes file whenever it
/// changes. Writes are atomic (temp file + rename) so the gateway watcher
/// sees whole tables only.
pub fn spawn_routes_mirror(
    store: Arc<dyn Store>,
    routes_file: PathBuf,
    namespace: Option<String>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = store.watch(ResourceKind::ConfigBlob);
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(WatchEvent::Applied(obj)) => {
                        let key = obj.object_ref();
                        if key.name != ROUTES_BLOB_NAME {
                            continue;
                        }
                        if namespace.as_deref().is_some_and(|ns| ns != key.namespace) {
                            continue;
                        }
                        let Some(blob) = obj.as_config_blob() else { continue };
                        let Some(table) = blob.data.get(ROUTES_BLOB_KEY) else { continue };
                        if let Err(e) = write_atomically(&routes_file, table).await {
                            tracing::warn!(path = %routes_file.display(), "routes mirror write failed: {e}");
                        }
                    }
                    Ok(WatchEvent::Deleted(_, _)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}
