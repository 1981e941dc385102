// crates/weft-server/src/reconcile/mod.rs
// Reconciliation engine: convergence loops for declared resources
//
// Each resource kind gets an independent worker pool fed by a keyed queue.
// Watch events on the primary kind enqueue the object itself; events on
// related kinds are mapped to the keys they affect. Reconcile passes are
// idempotent, so partial work on shutdown is tolerated.

pub mod agent;
pub mod extract;
pub mod queue;
pub mod route;
pub mod task;
pub mod tool;

pub use agent::AgentReconciler;
pub use route::RouteReconciler;
pub use task::TaskReconciler;
pub use tool::ToolReconciler;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::error::Result;
use crate::store::{Store, WatchEvent};
use queue::WorkQueue;
use weft_types::{ObjectRef, ResourceKind};

/// Requeue delay after a domain failure (resolution, store hiccup).
pub const FAILURE_REQUEUE: Duration = Duration::from_secs(30);

/// Poll interval for Tasks waiting on their orchestration Job.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Watch resync period: the store re-delivers every live object.
pub const RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// What to do after a successful reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Primary kind this reconciler converges.
    fn kind(&self) -> ResourceKind;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Related kinds whose events may affect objects of the primary kind.
    fn watched_kinds(&self) -> Vec<ResourceKind> {
        Vec::new()
    }

    /// Map a related-kind event to the primary keys it affects.
    async fn map_related(&self, _event: &WatchEvent) -> Result<Vec<ObjectRef>> {
        Ok(Vec::new())
    }

    async fn reconcile(&self, key: &ObjectRef) -> Result<Action>;
}

/// Extract the parent keys of an event's object by owner reference. Used by
/// reconcilers whose children carry owner references back to them.
pub fn owner_keys(event: &WatchEvent, parent_kind: ResourceKind) -> Vec<ObjectRef> {
    match event {
        WatchEvent::Applied(obj) => {
            let namespace = &obj.metadata().namespace;
            obj.metadata()
                .owner_references
                .iter()
                .filter(|r| r.kind == parent_kind)
                .map(|r| ObjectRef::new(namespace.clone(), r.name.clone()))
                .collect()
        }
        WatchEvent::Deleted(_, _) => Vec::new(),
    }
}

/// A running controller: one keyed queue, N workers, watch forwarders.
pub struct Controller {
    queue: Arc<WorkQueue>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Controller {
    /// Spawn workers and watch forwarders for a reconciler. The controller
    /// drains when `shutdown` flips to true.
    pub fn spawn<R: Reconciler>(
        store: Arc<dyn Store>,
        reconciler: Arc<R>,
        workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let queue = WorkQueue::new();
        let mut handles = Vec::new();

        // Primary watch: enqueue the object itself.
        handles.push(Self::forward_watch(
            store.watch(reconciler.kind()),
            Arc::clone(&queue),
            shutdown.clone(),
            None,
            Arc::clone(&reconciler),
        ));

        // Related watches: map events through the reconciler.
        for kind in reconciler.watched_kinds() {
            handles.push(Self::forward_watch(
                store.watch(kind),
                Arc::clone(&queue),
                shutdown.clone(),
                Some(kind),
                Arc::clone(&reconciler),
            ));
        }

        for worker_id in 0..workers.max(1) {
            let queue = Arc::clone(&queue);
            let reconciler = Arc::clone(&reconciler);
            handles.push(tokio::spawn(async move {
                while let Some(key) = queue.next().await {
                    let outcome = reconciler.reconcile(&key).await;
                    match outcome {
                        Ok(Action::Done) => {}
                        Ok(Action::RequeueAfter(delay)) => queue.add_after(key.clone(), delay),
                        Err(e) if e.is_conflict() => {
                            // Status-update race: another pass will see the
                            // fresh version.
                            tracing::debug!(
                                controller = reconciler.name(),
                                key = %key,
                                "requeue on version conflict"
                            );
                            queue.add_after(key.clone(), Duration::from_millis(100));
                        }
                        Err(e) => {
                            tracing::warn!(
                                controller = reconciler.name(),
                                worker = worker_id,
                                key = %key,
                                "reconcile failed: {e}"
                            );
                            queue.add_after(key.clone(), FAILURE_REQUEUE);
                        }
                    }
                    queue.done(&key).await;
                }
            }));
        }

        // Shutdown propagation
        {
            let queue = Arc::clone(&queue);
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        queue.shutdown().await;
                        break;
                    }
                    if shutdown.changed().await.is_err() {
                        queue.shutdown().await;
                        break;
                    }
                }
            }));
        }

        Self { queue, handles }
    }

    fn forward_watch<R: Reconciler>(
        mut rx: broadcast::Receiver<WatchEvent>,
        queue: Arc<WorkQueue>,
        mut shutdown: watch::Receiver<bool>,
        mapped: Option<ResourceKind>,
        reconciler: Arc<R>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => {
                            let keys = match mapped {
                                None => vec![event.object_ref()],
                                Some(_) => match reconciler.map_related(&event).await {
                                    Ok(keys) => keys,
                                    Err(e) => {
                                        tracing::warn!(
                                            controller = reconciler.name(),
                                            "watch mapping failed: {e}"
                                        );
                                        Vec::new()
                                    }
                                },
                            };
                            for key in keys {
                                queue.add(key).await;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // Resync re-delivers everything; dropped events heal.
                            tracing::debug!(
                                controller = reconciler.name(),
                                missed,
                                "watch lagged"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
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

    /// Enqueue a key directly (startup priming, tests).
    pub async fn enqueue(&self, key: ObjectRef) {
        self.queue.add(key).await;
    }

    /// Wait for all workers and forwarders to finish.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Prime a controller with every existing object of its kind, so restarts
/// converge without waiting for the first resync tick.
pub async fn prime<R: Reconciler>(
    store: &Arc<dyn Store>,
    reconciler: &Arc<R>,
    controller: &Controller,
) -> Result<()> {
    for obj in store.list(reconciler.kind(), None).await? {
        controller.enqueue(obj.object_ref()).await;
    }
    Ok(())
}
