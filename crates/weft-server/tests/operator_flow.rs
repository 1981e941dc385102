//! Controller integration: the four reconcilers running as real worker
//! pools against the in-memory store, converging on watch events.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use weft::reconcile::route::{ROUTES_BLOB_KEY, ROUTES_BLOB_NAME};
use weft::reconcile::{
    AgentReconciler, Controller, RouteReconciler, TaskReconciler, ToolReconciler,
};
use weft::render::CONFIG_HASH_ANNOTATION;
use weft::store::{MemoryStore, Object, Store};
use weft_types::{
    Agent, AgentSpec, BackendRef, CompiledRouteTable, JobState, ModelSpec, ObjectRef, ResourceKind,
    Route, RouteRule, RouteSpec, RuleMatch, Task, TaskLimits, TaskPhase, TaskSource, TaskSourceType,
    TaskSpec, Tool, ToolRef, ToolSpec,
};

struct Harness {
    store: Arc<MemoryStore>,
    shutdown: watch::Sender<bool>,
    controllers: Vec<Controller>,
}

impl Harness {
    fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let dyn_store = store.clone() as Arc<dyn Store>;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controllers = vec![
            Controller::spawn(
                Arc::clone(&dyn_store),
                Arc::new(ToolReconciler::new(Arc::clone(&dyn_store))),
                2,
                shutdown_rx.clone(),
            ),
            Controller::spawn(
                Arc::clone(&dyn_store),
                Arc::new(AgentReconciler::new(Arc::clone(&dyn_store))),
                2,
                shutdown_rx.clone(),
            ),
            Controller::spawn(
                Arc::clone(&dyn_store),
                Arc::new(RouteReconciler::new(Arc::clone(&dyn_store))),
                2,
                shutdown_rx.clone(),
            ),
            Controller::spawn(
                Arc::clone(&dyn_store),
                Arc::new(TaskReconciler::new(Arc::clone(&dyn_store))),
                2,
                shutdown_rx.clone(),
            ),
        ];

        Self {
            store,
            shutdown: shutdown_tx,
            controllers,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        for controller in self.controllers {
            controller.join().await;
        }
    }

    /// Poll until `check` passes or two seconds elapse.
    async fn eventually<F, Fut>(&self, what: &str, mut check: F)
    where
        F: FnMut(Arc<MemoryStore>) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check(self.store.clone()).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held: {what}");
    }
}

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

async fn agent(store: &Arc<MemoryStore>, key: &ObjectRef) -> Option<Agent> {
    store
        .get(ResourceKind::Agent, key)
        .await
        .unwrap()
        .and_then(Object::into_agent)
}

async fn deployment_hash(store: &Arc<MemoryStore>, key: &ObjectRef) -> Option<String> {
    store
        .get(ResourceKind::Deployment, key)
        .await
        .unwrap()
        .and_then(Object::into_deployment)
        .and_then(|d| d.template.annotations.get(CONFIG_HASH_ANNOTATION).cloned())
}

#[tokio::test]
async fn test_agent_becomes_ready_through_watch_chain() {
    let harness = Harness::start();
    let store = &harness.store;

    store
        .create(Object::Tool(Tool::new(
            "prod",
            "search",
            ToolSpec {
                image: "ghcr.io/acme/search:1".to_string(),
                pull_policy: "IfNotPresent".to_string(),
                entry_module: None,
                tools: Vec::new(),
            },
        )))
        .await
        .unwrap();
    store
        .create(Object::Agent(Agent::new(
            "prod",
            "alpha",
            agent_spec(
                "A",
                vec![ToolRef {
                    name: "search".to_string(),
                    namespace: None,
                    enable: Vec::new(),
                    disable: Vec::new(),
                }],
            ),
        )))
        .await
        .unwrap();

    // Tool reconciles to ready, which unblocks the agent's children
    let worker_key = ObjectRef::new("prod", "alpha-worker");
    harness
        .eventually("worker deployment exists", |store| {
            let key = worker_key.clone();
            async move {
                store
                    .get(ResourceKind::Deployment, &key)
                    .await
                    .unwrap()
                    .is_some()
            }
        })
        .await;

    // Scheduler reports a replica; the agent flips ready with an endpoint
    store.set_deployment_available(&worker_key, 1).await.unwrap();
    let agent_key = ObjectRef::new("prod", "alpha");
    harness
        .eventually("agent ready", |store| {
            let key = agent_key.clone();
            async move {
                store
                    .get(ResourceKind::Agent, &key)
                    .await
                    .unwrap()
                    .and_then(Object::into_agent)
                    .is_some_and(|a| {
                        a.status.ready
                            && a.status.endpoint == "alpha.prod.svc.cluster.local:8080"
                    })
            }
        })
        .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_config_hash_rolling_update_and_revert() {
    let harness = Harness::start();
    let store = &harness.store;

    let created = store
        .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", vec![]))))
        .await
        .unwrap();
    let worker_key = ObjectRef::new("prod", "alpha-worker");

    harness
        .eventually("initial hash stamped", |store| {
            let key = worker_key.clone();
            async move { deployment_hash(&store, &key).await.is_some() }
        })
        .await;
    let h1 = deployment_hash(store, &worker_key).await.unwrap();

    // Patch the prompt: the hash must move
    let mut edited = created.clone().into_agent().unwrap();
    edited.spec.prompt = "B".to_string();
    store.update(Object::Agent(edited)).await.unwrap();
    harness
        .eventually("hash changed", |store| {
            let key = worker_key.clone();
            let h1 = h1.clone();
            async move { deployment_hash(&store, &key).await.is_some_and(|h| h != h1) }
        })
        .await;
    let h2 = deployment_hash(store, &worker_key).await.unwrap();
    assert_ne!(h1, h2);

    // Patch it back: the hash must return to its original value
    let mut reverted = created.into_agent().unwrap();
    reverted.spec.prompt = "A".to_string();
    store.update(Object::Agent(reverted)).await.unwrap();
    let expected = h1.clone();
    harness
        .eventually("hash reverted", |store| {
            let key = worker_key.clone();
            let expected = expected.clone();
            async move { deployment_hash(&store, &key).await.is_some_and(|h| h == expected) }
        })
        .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_agent_change_recompiles_route_table() {
    let harness = Harness::start();
    let store = &harness.store;

    store
        .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", vec![]))))
        .await
        .unwrap();
    store
        .create(Object::Route(Route::new(
            "prod",
            "main",
            RouteSpec {
                rules: vec![RouteRule {
                    name: "r".to_string(),
                    priority: 10,
                    r#match: RuleMatch {
                        agent: Some("alpha".to_string()),
                        ..Default::default()
                    },
                    backends: vec![BackendRef {
                        agent_ref: "alpha".to_string(),
                        namespace: None,
                        weight: None,
                    }],
                }],
                defaults: Default::default(),
            },
        )))
        .await
        .unwrap();

    // Compiled with an unready backend first
    let blob_key = ObjectRef::new("prod", ROUTES_BLOB_NAME);
    harness
        .eventually("table compiled", |store| {
            let key = blob_key.clone();
            async move {
                store
                    .get(ResourceKind::ConfigBlob, &key)
                    .await
                    .unwrap()
                    .is_some()
            }
        })
        .await;

    // Agent readiness flows into the compiled table via the cross-kind watch
    store
        .set_deployment_available(&ObjectRef::new("prod", "alpha-worker"), 1)
        .await
        .unwrap();
    harness
        .eventually("backend marked ready in table", |store| {
            let key = blob_key.clone();
            async move {
                let Some(blob) = store
                    .get(ResourceKind::ConfigBlob, &key)
                    .await
                    .unwrap()
                    .and_then(Object::into_config_blob)
                else {
                    return false;
                };
                let Ok(table) = CompiledRouteTable::from_blob(&blob.data[ROUTES_BLOB_KEY]) else {
                    return false;
                };
                table
                    .rules
                    .first()
                    .and_then(|r| r.backends.first())
                    .is_some_and(|b| b.ready && !b.endpoint.is_empty())
            }
        })
        .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_task_lifecycle_to_completion() {
    let harness = Harness::start();
    let store = &harness.store;

    // Ready worker agent
    store
        .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", vec![]))))
        .await
        .unwrap();
    store
        .set_deployment_available(&ObjectRef::new("prod", "alpha-worker"), 1)
        .await
        .unwrap();

    let task_key = ObjectRef::new("prod", "migrate");
    harness
        .eventually("agent ready", |store| {
            async move {
                store
                    .get(ResourceKind::Agent, &ObjectRef::new("prod", "alpha"))
                    .await
                    .unwrap()
                    .and_then(Object::into_agent)
                    .is_some_and(|a| a.status.ready)
            }
        })
        .await;

    store
        .create(Object::Task(Task::new(
            "prod",
            "migrate",
            TaskSpec {
                worker_ref: "alpha".to_string(),
                orchestrator_ref: None,
                task_source: TaskSource {
                    r#type: TaskSourceType::Inline,
                    content: Some(r#"{"stories": [{"id": 1}]}"#.to_string()),
                    name: None,
                    key: None,
                },
                limits: TaskLimits::default(),
                quality_gates: Vec::new(),
                git: None,
                paused: false,
                context: Default::default(),
            },
        )))
        .await
        .unwrap();

    let job_key = ObjectRef::new("prod", "migrate-run");
    harness
        .eventually("job created and task running", |store| {
            let task_key = task_key.clone();
            let job_key = job_key.clone();
            async move {
                let running = store
                    .get(ResourceKind::Task, &task_key)
                    .await
                    .unwrap()
                    .and_then(Object::into_task)
                    .is_some_and(|t| t.status.phase == TaskPhase::Running);
                let job = store
                    .get(ResourceKind::Job, &job_key)
                    .await
                    .unwrap()
                    .is_some();
                running && job
            }
        })
        .await;

    store
        .set_job_logs(
            &job_key,
            "iterating\nORCHESTRATOR_RESULT:{\"passed\":true,\"completedTasks\":1,\"totalTasks\":1,\"iterations\":2}\n",
        )
        .await;
    store
        .set_job_state(&job_key, JobState::Succeeded, "")
        .await
        .unwrap();

    harness
        .eventually("task completed", |store| {
            let key = task_key.clone();
            async move {
                store
                    .get(ResourceKind::Task, &key)
                    .await
                    .unwrap()
                    .and_then(Object::into_task)
                    .is_some_and(|t| {
                        t.status.phase == TaskPhase::Completed && t.status.completed_tasks == 1
                    })
            }
        })
        .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_deleting_agent_garbage_collects_children() {
    let harness = Harness::start();
    let store = &harness.store;

    store
        .create(Object::Agent(Agent::new("prod", "alpha", agent_spec("A", vec![]))))
        .await
        .unwrap();
    let worker_key = ObjectRef::new("prod", "alpha-worker");
    harness
        .eventually("children exist", |store| {
            let key = worker_key.clone();
            async move {
                store
                    .get(ResourceKind::Deployment, &key)
                    .await
                    .unwrap()
                    .is_some()
            }
        })
        .await;

    store
        .delete(ResourceKind::Agent, &ObjectRef::new("prod", "alpha"))
        .await
        .unwrap();
    harness
        .eventually("children collected", |store| {
            let key = worker_key.clone();
            async move {
                let dep = store
                    .get(ResourceKind::Deployment, &key)
                    .await
                    .unwrap()
                    .is_none();
                let svc = store
                    .get(ResourceKind::Service, &ObjectRef::new("prod", "alpha"))
                    .await
                    .unwrap()
                    .is_none();
                dep && svc
            }
        })
        .await;

    harness.stop().await;
}
