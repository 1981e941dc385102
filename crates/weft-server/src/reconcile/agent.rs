// crates/weft-server/src/reconcile/agent.rs
// Agent reconciler: materializes worker identity, config, deployment, service

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::render::{
    render_worker_config, render_worker_config_blob, render_worker_deployment,
    render_worker_identity, render_worker_service, worker_config_hash, worker_endpoint,
};
use crate::store::{Object, Store, WatchEvent};
use weft_types::{
    set_condition, Agent, ConditionStatus, ObjectRef, ResourceKind, Tool, CONDITION_READY,
};

use super::{owner_keys, Action, Reconciler, FAILURE_REQUEUE};

pub struct AgentReconciler {
    store: Arc<dyn Store>,
}

impl AgentReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolve every tool reference, in declaration order. A missing or
    /// not-ready Tool blocks the whole agent.
    async fn resolve_tools(&self, agent: &Agent) -> std::result::Result<Vec<Tool>, String> {
        let mut tools = Vec::with_capacity(agent.spec.tool_refs.len());
        for tool_ref in &agent.spec.tool_refs {
            let namespace = tool_ref
                .namespace
                .clone()
                .unwrap_or_else(|| agent.metadata.namespace.clone());
            let key = ObjectRef::new(namespace, tool_ref.name.clone());
            let tool = self
                .store
                .get(ResourceKind::Tool, &key)
                .await
                .ok()
                .flatten()
                .and_then(Object::into_tool);
            match tool {
                Some(tool) if tool.status.ready => tools.push(tool),
                Some(_) => return Err(format!("tool {key} is not ready")),
                None => return Err(format!("tool {key} not found")),
            }
        }
        Ok(tools)
    }

    /// Create the descriptor if absent, replace it if it drifted. All
    /// orchestrator writes for a kind stay on this one path.
    async fn upsert(&self, desired: Object) -> Result<()> {
        let key = desired.object_ref();
        match self.store.get(desired.kind(), &key).await? {
            None => {
                self.store.create(desired).await?;
            }
            Some(stored) => {
                if descriptors_differ(&stored, &desired) {
                    self.store.update(desired).await?;
                }
            }
        }
        Ok(())
    }
}

/// Compare a stored descriptor against its desired rendering, ignoring fields
/// the store or orchestrator owns (metadata bookkeeping, availability).
fn descriptors_differ(stored: &Object, desired: &Object) -> bool {
    match (stored, desired) {
        (Object::Deployment(s), Object::Deployment(d)) => {
            s.replicas != d.replicas || s.selector != d.selector || s.template != d.template
        }
        (Object::Service(s), Object::Service(d)) => {
            s.selector != d.selector || s.ports != d.ports
        }
        (Object::ConfigBlob(s), Object::ConfigBlob(d)) => s.data != d.data,
        (Object::ServiceAccount(_), Object::ServiceAccount(_)) => false,
        _ => true,
    }
}

#[async_trait]
impl Reconciler for AgentReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Agent
    }

    fn name(&self) -> &'static str {
        "agent"
    }

    fn watched_kinds(&self) -> Vec<ResourceKind> {
        vec![
            ResourceKind::Tool,
            ResourceKind::Deployment,
            ResourceKind::Service,
            ResourceKind::ConfigBlob,
            ResourceKind::ServiceAccount,
        ]
    }

    async fn map_related(&self, event: &WatchEvent) -> Result<Vec<ObjectRef>> {
        match event.kind() {
            // A Tool change re-enqueues every Agent referencing it.
            ResourceKind::Tool => {
                let tool_key = event.object_ref();
                let mut keys = Vec::new();
                for obj in self.store.list(ResourceKind::Agent, None).await? {
                    let Some(agent) = obj.as_agent() else { continue };
                    let references = agent.spec.tool_refs.iter().any(|r| {
                        r.name == tool_key.name
                            && r.namespace.as_deref().unwrap_or(&agent.metadata.namespace)
                                == tool_key.namespace
                    });
                    if references {
                        keys.push(obj.object_ref());
                    }
                }
                Ok(keys)
            }
            // Owned children re-enqueue their parent.
            _ => match event {
                WatchEvent::Applied(_) => Ok(owner_keys(event, ResourceKind::Agent)),
                // Deleted events carry no owner references; sweep the
                // namespace so the parent recreates its child.
                WatchEvent::Deleted(_, key) => Ok(self
                    .store
                    .list(ResourceKind::Agent, Some(&key.namespace))
                    .await?
                    .iter()
                    .map(Object::object_ref)
                    .collect()),
            },
        }
    }

    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let Some(obj) = self.store.get(ResourceKind::Agent, key).await? else {
            return Ok(Action::Done);
        };
        let Some(mut agent) = obj.into_agent() else {
            return Ok(Action::Done);
        };

        if agent.metadata.is_deleting() {
            // Owner references take the children with it.
            return Ok(Action::Done);
        }

        let generation = agent.metadata.generation;

        let tools = match self.resolve_tools(&agent).await {
            Ok(tools) => tools,
            Err(message) => {
                agent.status.ready = false;
                agent.status.endpoint.clear();
                agent.status.available_tools.clear();
                set_condition(
                    &mut agent.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::False,
                    "ToolResolutionFailed",
                    &message,
                    generation,
                );
                self.store.update_status(Object::Agent(agent)).await?;
                return Ok(Action::RequeueAfter(FAILURE_REQUEUE));
            }
        };

        let rendered = render_worker_config(&agent, &tools)?;
        let hash = worker_config_hash(&rendered);

        self.upsert(Object::ServiceAccount(render_worker_identity(&agent)))
            .await?;

        self.upsert(Object::ConfigBlob(render_worker_config_blob(&agent, &rendered)))
            .await?;

        self.upsert(Object::Deployment(render_worker_deployment(
            &agent, &tools, &hash,
        )))
        .await?;
        self.upsert(Object::Service(render_worker_service(&agent)))
            .await?;

        // Readiness comes from the orchestrator's view of the deployment.
        let deployment_key = ObjectRef::new(
            agent.metadata.namespace.clone(),
            format!("{}-worker", agent.metadata.name),
        );
        let available = self
            .store
            .get(ResourceKind::Deployment, &deployment_key)
            .await?
            .and_then(Object::into_deployment)
            .map(|d| d.available_replicas)
            .unwrap_or(0);
        let desired = agent.spec.replicas;
        let ready = available >= desired && available > 0;

        agent.status.ready = ready;
        agent.status.available_replicas = available;
        agent.status.config_hash = hash;
        if ready {
            agent.status.endpoint =
                worker_endpoint(&agent.metadata.namespace, &agent.metadata.name);
            agent.status.available_tools = agent.spec.tools.clone();
            set_condition(
                &mut agent.status.conditions,
                CONDITION_READY,
                ConditionStatus::True,
                "WorkersAvailable",
                &format!("{available}/{desired} replicas available"),
                generation,
            );
        } else {
            agent.status.endpoint.clear();
            agent.status.available_tools.clear();
            set_condition(
                &mut agent.status.conditions,
                CONDITION_READY,
                ConditionStatus::False,
                "WorkersUnavailable",
                &format!("{available}/{desired} replicas available"),
                generation,
            );
        }

        self.store.update_status(Object::Agent(agent)).await?;
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::CONFIG_HASH_ANNOTATION;
    use crate::store::MemoryStore;
    use weft_types::{AgentSpec, ModelSpec, ToolRef, ToolSpec};

    fn agent_spec(prompt: &str, tool_refs: Vec<ToolRef>) -> AgentSpec {
        AgentSpec {
            prompt: prompt.to_string(),
            model: ModelSpec {
                provider: "anthropic".to_string(),
                model_id: "claude-sonnet-4".to_string(),
                temperature: None,
                max_tokens: None,
                endpoint: None,
            },
            tool_refs,
            policy: Default::default(),
            network: Default::default(),
            replicas: 1,
            resources: None,
            image: None,
            env: Vec::new(),
            env_from: Vec::new(),
            tools: Vec::new(),
        }
    }

    async fn setup() -> (Arc<MemoryStore>, AgentReconciler) {
        let store = Arc::new(MemoryStore::new());
        let reconciler = AgentReconciler::new(store.clone() as Arc<dyn Store>);
        (store, reconciler)
    }

    #[tokio::test]
    async fn test_materializes_children_and_hash() {
        let (store, reconciler) = setup().await;
        store
            .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", vec![]))))
            .await
            .unwrap();

        let key = ObjectRef::new("prod", "alpha");
        reconciler.reconcile(&key).await.unwrap();

        let worker_key = ObjectRef::new("prod", "alpha-worker");
        let deployment = store
            .get(ResourceKind::Deployment, &worker_key)
            .await
            .unwrap()
            .unwrap()
            .into_deployment()
            .unwrap();
        let hash = deployment.template.annotations[CONFIG_HASH_ANNOTATION].clone();
        assert_eq!(hash.len(), 16);

        assert!(store
            .get(ResourceKind::Service, &key)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get(ResourceKind::ConfigBlob, &worker_key)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get(ResourceKind::ServiceAccount, &worker_key)
            .await
            .unwrap()
            .is_some());

        // Not ready until the orchestrator reports replicas
        let stored = store
            .get(ResourceKind::Agent, &key)
            .await
            .unwrap()
            .unwrap()
            .into_agent()
            .unwrap();
        assert!(!stored.status.ready);
        assert!(stored.status.endpoint.is_empty());
        assert_eq!(stored.status.config_hash, hash);
    }

    #[tokio::test]
    async fn test_hash_rolls_and_reverts_with_prompt() {
        let (store, reconciler) = setup().await;
        let created = store
            .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", vec![]))))
            .await
            .unwrap();

        let key = ObjectRef::new("prod", "alpha");
        reconciler.reconcile(&key).await.unwrap();
        let h1 = store
            .get(ResourceKind::Agent, &key)
            .await
            .unwrap()
            .unwrap()
            .into_agent()
            .unwrap()
            .status
            .config_hash;

        let mut edited = created.clone().into_agent().unwrap();
        edited.spec.prompt = "B".to_string();
        store.update(Object::Agent(edited)).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        let h2 = store
            .get(ResourceKind::Agent, &key)
            .await
            .unwrap()
            .unwrap()
            .into_agent()
            .unwrap()
            .status
            .config_hash;
        assert_ne!(h1, h2);

        let mut reverted = created.into_agent().unwrap();
        reverted.spec.prompt = "A".to_string();
        store.update(Object::Agent(reverted)).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        let h3 = store
            .get(ResourceKind::Agent, &key)
            .await
            .unwrap()
            .unwrap()
            .into_agent()
            .unwrap()
            .status
            .config_hash;
        assert_eq!(h1, h3);
    }

    #[tokio::test]
    async fn test_ready_once_replicas_available() {
        let (store, reconciler) = setup().await;
        store
            .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", vec![]))))
            .await
            .unwrap();

        let key = ObjectRef::new("prod", "alpha");
        reconciler.reconcile(&key).await.unwrap();

        store
            .set_deployment_available(&ObjectRef::new("prod", "alpha-worker"), 1)
            .await
            .unwrap();
        reconciler.reconcile(&key).await.unwrap();

        let stored = store
            .get(ResourceKind::Agent, &key)
            .await
            .unwrap()
            .unwrap()
            .into_agent()
            .unwrap();
        assert!(stored.status.ready);
        assert_eq!(stored.status.endpoint, "alpha.prod.svc.cluster.local:8080");
        assert_eq!(stored.status.available_replicas, 1);
    }

    #[tokio::test]
    async fn test_unresolved_tool_blocks_agent() {
        let (store, reconciler) = setup().await;
        let tool_refs = vec![ToolRef {
            name: "search".to_string(),
            namespace: None,
            enable: Vec::new(),
            disable: Vec::new(),
        }];
        store
            .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", tool_refs))))
            .await
            .unwrap();

        let key = ObjectRef::new("prod", "alpha");
        let action = reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::RequeueAfter(FAILURE_REQUEUE));

        let stored = store
            .get(ResourceKind::Agent, &key)
            .await
            .unwrap()
            .unwrap()
            .into_agent()
            .unwrap();
        assert!(!stored.status.ready);
        assert_eq!(stored.status.conditions[0].reason, "ToolResolutionFailed");

        // No deployment is rendered while resolution fails
        assert!(store
            .get(ResourceKind::Deployment, &ObjectRef::new("prod", "alpha-worker"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_not_ready_tool_blocks_agent() {
        let (store, reconciler) = setup().await;
        // Tool exists but its reconciler has not marked it ready
        store
            .create(Object::Tool(weft_types::Tool::new(
                "prod",
                "search",
                ToolSpec {
                    image: "img:1".to_string(),
                    pull_policy: "IfNotPresent".to_string(),
                    entry_module: None,
                    tools: Vec::new(),
                },
            )))
            .await
            .unwrap();
        let tool_refs = vec![ToolRef {
            name: "search".to_string(),
            namespace: None,
            enable: Vec::new(),
            disable: Vec::new(),
        }];
        store
            .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", tool_refs))))
            .await
            .unwrap();

        let action = reconciler
            .reconcile(&ObjectRef::new("prod", "alpha"))
            .await
            .unwrap();
        assert_eq!(action, Action::RequeueAfter(FAILURE_REQUEUE));
    }
}
