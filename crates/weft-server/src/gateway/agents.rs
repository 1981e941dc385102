// crates/weft-server/src/gateway/agents.rs
// Agent watcher cache for the gateway
//
// The compiled table serves routing; this cache serves everything that needs
// live Agent detail: /v1/agents, MCP tools/list and tools/call readiness
// checks, and list_changed notifications when the ready set moves.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};

use crate::store::{Store, WatchEvent};
use weft_types::{ObjectRef, ResourceKind, ToolDef};

#[derive(Debug, Clone)]
pub struct CachedAgent {
    pub ready: bool,
    pub endpoint: String,
    pub prompt: String,
    pub tools: Vec<ToolDef>,
}

pub struct AgentCache {
    agents: RwLock<HashMap<ObjectRef, CachedAgent>>,
    /// Fires whenever the set of (ready agent, advertised tools) changes.
    changed: broadcast::Sender<()>,
    namespace: Option<String>,
}

impl AgentCache {
    pub fn new(namespace: Option<String>) -> Arc<Self> {
        let (changed, _) = broadcast::channel(16);
        Arc::new(Self {
            agents: RwLock::new(HashMap::new()),
            changed,
            namespace,
        })
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }

    fn in_scope(&self, key: &ObjectRef) -> bool {
        self.namespace
            .as_deref()
            .is_none_or(|ns| key.namespace == ns)
    }

    /// Fingerprint of the ready surface: which agents are ready and what
    /// they advertise. Changes to it trigger notifications.
    async fn ready_fingerprint(&self) -> Vec<(ObjectRef, Vec<String>)> {
        let agents = self.agents.read().await;
        let mut ready: Vec<(ObjectRef, Vec<String>)> = agents
            .iter()
            .filter(|(_, a)| a.ready)
            .map(|(key, a)| {
                (
                    key.clone(),
                    a.tools.iter().map(|t| t.name.clone()).collect(),
                )
            })
            .collect();
        ready.sort();
        ready
    }

    async fn apply(&self, event: &WatchEvent) {
        match event {
            WatchEvent::Applied(obj) => {
                let Some(agent) = obj.as_agent() else { return };
                let key = obj.object_ref();
                if !self.in_scope(&key) {
                    return;
                }
                let cached = CachedAgent {
                    ready: agent.status.ready,
                    endpoint: agent.status.endpoint.clone(),
                    prompt: agent.spec.prompt.clone(),
                    tools: agent.status.available_tools.clone(),
                };
                self.agents.write().await.insert(key, cached);
            }
            WatchEvent::Deleted(_, key) => {
                if self.in_scope(key) {
                    self.agents.write().await.remove(key);
                }
            }
        }
    }

    pub async fn get(&self, key: &ObjectRef) -> Option<CachedAgent> {
        self.agents.read().await.get(key).cloned()
    }

    /// Look an agent up by bare name, preferring the configured namespace.
    pub async fn get_by_name(&self, name: &str) -> Option<(ObjectRef, CachedAgent)> {
        let agents = self.agents.read().await;
        let mut candidates: Vec<(&ObjectRef, &CachedAgent)> =
            agents.iter().filter(|(key, _)| key.name == name).collect();
        candidates.sort_by(|a, b| a.0.cmp(b.0));
        candidates
            .first()
            .map(|(key, agent)| ((*key).clone(), (*agent).clone()))
    }

    /// Ready agents, sorted by namespace/name.
    pub async fn ready_agents(&self) -> Vec<(ObjectRef, CachedAgent)> {
        let agents = self.agents.read().await;
        let mut ready: Vec<(ObjectRef, CachedAgent)> = agents
            .iter()
            .filter(|(_, a)| a.ready)
            .map(|(key, agent)| (key.clone(), agent.clone()))
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));
        ready
    }

    /// Prime from the store and follow the Agent watch until shutdown.
    pub fn spawn(
        self: &Arc<Self>,
        store: Arc<dyn Store>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = store.watch(ResourceKind::Agent);

            match store
                .list(ResourceKind::Agent, cache.namespace.as_deref())
                .await
            {
                Ok(objects) => {
                    for obj in objects {
                        cache.apply(&WatchEvent::Applied(obj)).await;
                    }
                }
                Err(e) => tracing::warn!("agent cache prime failed: {e}"),
            }
            let mut fingerprint = cache.ready_fingerprint().await;

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => {
                            cache.apply(&event).await;
                            let current = cache.ready_fingerprint().await;
                            if current != fingerprint {
                                fingerprint = current;
                                let _ = cache.changed.send(());
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Rebuild from a fresh list; the watch resumes after.
                            if let Ok(objects) = store
                                .list(ResourceKind::Agent, cache.namespace.as_deref())
                                .await
                            {
                                cache.agents.write().await.clear();
                                for obj in objects {
                                    cache.apply(&WatchEvent::Applied(obj)).await;
                                }
                                let current = cache.ready_fingerprint().await;
                                if current != fingerprint {
                                    fingerprint = current;
                                    let _ = cache.changed.send(());
                                }
                            }
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
}
