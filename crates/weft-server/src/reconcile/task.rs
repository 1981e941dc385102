// crates/weft-server/src/reconcile/task.rs
// Task controller: drives the orchestration Job state machine
//
// Pending -> Running -> {Completed, Failed, Paused}. Completed and Failed are
// terminal; Paused flips back to Running when spec.paused clears. Cleanup is
// finalizer-gated so a deleted Task never leaves its Job behind.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::render::{render_orchestration_job, render_workspace_claim};
use crate::render::job::{job_name, workspace_claim_name};
use crate::store::{Object, Store, WatchEvent};
use weft_types::{
    set_condition, Agent, ConditionStatus, IterationRecord, JobState, ObjectRef, ResourceKind,
    Task, TaskPhase, TaskSourceType, CONDITION_READY,
};

use super::{extract::extract_result, owner_keys, Action, Reconciler, FAILURE_REQUEUE, JOB_POLL_INTERVAL};

/// Finalizer guarding Job and workspace cleanup.
pub const TASK_FINALIZER: &str = "weft.io/task-cleanup";

/// Annotation tracking how often the Job had to be recreated.
const RECREATIONS_ANNOTATION: &str = "weft.io/job-recreations";

/// Lines of Job log tailed for result extraction.
const LOG_TAIL_LINES: usize = 1_000;

/// Bound on `status.recent_iterations`.
const RECENT_ITERATIONS_CAP: usize = 10;

pub struct TaskReconciler {
    store: Arc<dyn Store>,
}

impl TaskReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn resolve_agent(&self, namespace: &str, name: &str) -> std::result::Result<Agent, String> {
        let key = ObjectRef::new(namespace, name);
        match self
            .store
            .get(ResourceKind::Agent, &key)
            .await
            .ok()
            .flatten()
            .and_then(Object::into_agent)
        {
            Some(agent) if agent.status.ready => Ok(agent),
            Some(_) => Err(format!("agent {key} is not ready")),
            None => Err(format!("agent {key} not found")),
        }
    }

    /// Load the PRD text from the declared source.
    async fn load_prd(&self, task: &Task) -> std::result::Result<String, String> {
        let source = &task.spec.task_source;
        match source.r#type {
            TaskSourceType::Inline => source
                .content
                .clone()
                .ok_or_else(|| "inline task source requires content".to_string()),
            TaskSourceType::Configmap => {
                let name = source
                    .name
                    .as_deref()
                    .ok_or_else(|| "configmap task source requires a name".to_string())?;
                let key = source.key.as_deref().unwrap_or("prd.json");
                let blob = self
                    .store
                    .get(
                        ResourceKind::ConfigBlob,
                        &ObjectRef::new(task.metadata.namespace.clone(), name),
                    )
                    .await
                    .ok()
                    .flatten()
                    .and_then(Object::into_config_blob)
                    .ok_or_else(|| format!("configmap {name} not found"))?;
                blob.data
                    .get(key)
                    .cloned()
                    .ok_or_else(|| format!("configmap {name} has no key {key}"))
            }
            TaskSourceType::Secret => {
                let name = source
                    .name
                    .as_deref()
                    .ok_or_else(|| "secret task source requires a name".to_string())?;
                let key = source.key.as_deref().unwrap_or("prd.json");
                let secret = self
                    .store
                    .get(
                        ResourceKind::Secret,
                        &ObjectRef::new(task.metadata.namespace.clone(), name),
                    )
                    .await
                    .ok()
                    .flatten()
                    .and_then(Object::into_secret)
                    .ok_or_else(|| format!("secret {name} not found"))?;
                secret
                    .data
                    .get(key)
                    .cloned()
                    .ok_or_else(|| format!("secret {name} has no key {key}"))
            }
        }
    }

    /// Count the work items in a PRD by looking for a `tasks` or `stories`
    /// array. A PRD that is not JSON counts as zero.
    fn count_tasks(prd: &str) -> u32 {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(prd) else {
            return 0;
        };
        for field in ["tasks", "stories"] {
            if let Some(items) = value.get(field).and_then(|v| v.as_array()) {
                return items.len() as u32;
            }
        }
        0
    }

    fn recreation_count(task: &Task) -> u32 {
        task.metadata
            .annotations
            .get(RECREATIONS_ANNOTATION)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Pending -> Running: resolve agents, ensure the workspace, load the
    /// PRD, and create the orchestration Job.
    async fn start(&self, mut task: Task) -> Result<Action> {
        let generation = task.metadata.generation;
        let namespace = task.metadata.namespace.clone();

        let worker = match self.resolve_agent(&namespace, &task.spec.worker_ref).await {
            Ok(agent) => agent,
            Err(message) => {
                set_condition(
                    &mut task.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::False,
                    "AgentResolutionFailed",
                    &message,
                    generation,
                );
                self.store.update_status(Object::Task(task)).await?;
                return Ok(Action::RequeueAfter(FAILURE_REQUEUE));
            }
        };

        let orchestrator_endpoint = match &task.spec.orchestrator_ref {
            Some(name) => match self.resolve_agent(&namespace, name).await {
                Ok(agent) => Some(agent.status.endpoint),
                Err(message) => {
                    set_condition(
                        &mut task.status.conditions,
                        CONDITION_READY,
                        ConditionStatus::False,
                        "AgentResolutionFailed",
                        &message,
                        generation,
                    );
                    self.store.update_status(Object::Task(task)).await?;
                    return Ok(Action::RequeueAfter(FAILURE_REQUEUE));
                }
            },
            None => None,
        };

        let prd = match self.load_prd(&task).await {
            Ok(prd) => prd,
            Err(message) => {
                set_condition(
                    &mut task.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::False,
                    "TaskSourceUnavailable",
                    &message,
                    generation,
                );
                self.store.update_status(Object::Task(task)).await?;
                return Ok(Action::RequeueAfter(FAILURE_REQUEUE));
            }
        };

        let claim_key = ObjectRef::new(namespace.clone(), workspace_claim_name(&task));
        if self
            .store
            .get(ResourceKind::VolumeClaim, &claim_key)
            .await?
            .is_none()
        {
            self.store
                .create(Object::VolumeClaim(render_workspace_claim(&task)))
                .await?;
        }

        let job_key = ObjectRef::new(namespace.clone(), job_name(&task));
        if self.store.get(ResourceKind::Job, &job_key).await?.is_none() {
            let job = render_orchestration_job(
                &task,
                &worker.status.endpoint,
                orchestrator_endpoint.as_deref(),
                &prd,
            )?;
            self.store.create(Object::Job(job)).await?;
        }

        task.status.phase = TaskPhase::Running;
        task.status.total_tasks = Self::count_tasks(&prd);
        if task.status.started_at.is_none() {
            task.status.started_at = Some(Utc::now());
        }
        if let Some(git) = &task.spec.git {
            task.status.repository_url = git.url.clone();
        }
        set_condition(
            &mut task.status.conditions,
            CONDITION_READY,
            ConditionStatus::False,
            "JobRunning",
            "orchestration job is running",
            generation,
        );
        self.store.update_status(Object::Task(task)).await?;
        Ok(Action::RequeueAfter(JOB_POLL_INTERVAL))
    }

    /// Terminal failure: clean up the Job and record the reason.
    async fn fail(&self, mut task: Task, reason: &str, message: &str) -> Result<Action> {
        let job_key = ObjectRef::new(task.metadata.namespace.clone(), job_name(&task));
        self.store.delete(ResourceKind::Job, &job_key).await?;

        let generation = task.metadata.generation;
        task.status.phase = TaskPhase::Failed;
        task.status.completed_at = Some(Utc::now());
        task.status.message = message.to_string();
        set_condition(
            &mut task.status.conditions,
            CONDITION_READY,
            ConditionStatus::False,
            reason,
            message,
            generation,
        );
        self.store.update_status(Object::Task(task)).await?;
        Ok(Action::Done)
    }

    /// Apply an extracted result to status fields shared by the success and
    /// failure paths.
    fn record_result(task: &mut Task, result: &weft_types::OrchestratorResult) {
        task.status.completed_tasks = result.completed_tasks;
        if result.total_tasks > 0 {
            task.status.total_tasks = result.total_tasks;
        }
        task.status.current_iteration = result.iterations;
        task.status.last_iteration_at = Some(Utc::now());
        if let Some(sha) = &result.commit_sha {
            task.status.last_commit_sha = sha.clone();
        }
        if let Some(url) = &result.pull_request_url {
            task.status.pull_request_url = url.clone();
        }
        let record = IterationRecord {
            iteration: result.iterations,
            passed: result.passed,
            summary: result
                .learnings
                .first()
                .cloned()
                .or_else(|| result.error.clone())
                .unwrap_or_default(),
            finished_at: Utc::now(),
        };
        task.status.recent_iterations.push(record);
        let len = task.status.recent_iterations.len();
        if len > RECENT_ITERATIONS_CAP {
            task.status.recent_iterations.drain(..len - RECENT_ITERATIONS_CAP);
        }
    }

    /// Push an updated PRD back to its configuration blob source.
    async fn persist_prd(&self, task: &Task, prd: &str) -> Result<()> {
        if task.spec.task_source.r#type != TaskSourceType::Configmap {
            return Ok(());
        }
        let Some(name) = task.spec.task_source.name.as_deref() else {
            return Ok(());
        };
        let key = task.spec.task_source.key.as_deref().unwrap_or("prd.json");
        let blob_key = ObjectRef::new(task.metadata.namespace.clone(), name);
        if let Some(mut blob) = self
            .store
            .get(ResourceKind::ConfigBlob, &blob_key)
            .await?
            .and_then(Object::into_config_blob)
        {
            blob.data.insert(key.to_string(), prd.to_string());
            self.store.update(Object::ConfigBlob(blob)).await?;
        }
        Ok(())
    }

    /// The Job finished successfully: extract the result line and settle the
    /// terminal phase.
    async fn complete(&self, mut task: Task, job_key: &ObjectRef) -> Result<Action> {
        let logs = self
            .store
            .job_logs(job_key, LOG_TAIL_LINES)
            .await
            .unwrap_or_default();
        let generation = task.metadata.generation;

        match extract_result(&logs) {
            Some(result) if result.passed => {
                Self::record_result(&mut task, &result);
                if let Some(prd) = &result.prd {
                    self.persist_prd(&task, prd).await?;
                }
                task.status.phase = TaskPhase::Completed;
                task.status.completed_at = Some(Utc::now());
                let message = format!(
                    "completed {}/{} tasks in {} iterations",
                    result.completed_tasks, task.status.total_tasks, result.iterations
                );
                task.status.message = message.clone();
                set_condition(
                    &mut task.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::True,
                    "Succeeded",
                    &message,
                    generation,
                );
                self.store.update_status(Object::Task(task)).await?;
                Ok(Action::Done)
            }
            Some(result) => {
                Self::record_result(&mut task, &result);
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "orchestrator reported failure".to_string());
                self.fail(task, "OrchestratorFailed", &message).await
            }
            None => {
                // The Job succeeded; a missing marker only degrades the
                // status detail.
                task.status.phase = TaskPhase::Completed;
                task.status.completed_at = Some(Utc::now());
                let message =
                    "job succeeded (result extraction failed: marker not found)".to_string();
                task.status.message = message.clone();
                set_condition(
                    &mut task.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::True,
                    "ExtractionFailed",
                    &message,
                    generation,
                );
                self.store.update_status(Object::Task(task)).await?;
                Ok(Action::Done)
            }
        }
    }

    /// Running: watch the Job until it settles, recreating it within budget
    /// when it disappears.
    async fn poll(&self, task: Task) -> Result<Action> {
        if let Some(started) = task.status.started_at {
            let elapsed = Utc::now().signed_duration_since(started);
            if elapsed.num_seconds() >= 0
                && elapsed.num_seconds() as u64 > task.spec.limits.total_timeout
            {
                let message = format!(
                    "total timeout exceeded after {}s",
                    task.spec.limits.total_timeout
                );
                return self.fail(task, "TotalTimeout", &message).await;
            }
        }

        let job_key = ObjectRef::new(task.metadata.namespace.clone(), job_name(&task));
        let Some(job) = self
            .store
            .get(ResourceKind::Job, &job_key)
            .await?
            .and_then(Object::into_job)
        else {
            let recreations = Self::recreation_count(&task) + 1;
            if recreations > task.spec.limits.max_job_recreations {
                let message = format!(
                    "orchestration job lost ({} recreations exhausted)",
                    task.spec.limits.max_job_recreations
                );
                return self.fail(task, "JobLost", &message).await;
            }

            // Stamp the counter, then drop back to Pending to recreate.
            let mut stamped = task;
            stamped
                .metadata
                .annotations
                .insert(RECREATIONS_ANNOTATION.to_string(), recreations.to_string());
            let mut updated = self
                .store
                .update(Object::Task(stamped))
                .await?
                .into_task()
                .ok_or_else(|| crate::error::WeftError::Other("task update lost".to_string()))?;
            tracing::warn!(
                task = %updated.metadata.object_ref(),
                recreations,
                "orchestration job disappeared; recreating"
            );
            updated.status.phase = TaskPhase::Pending;
            self.store.update_status(Object::Task(updated)).await?;
            return Ok(Action::RequeueAfter(Duration::from_secs(1)));
        };

        match job.status.state {
            JobState::Active => Ok(Action::RequeueAfter(JOB_POLL_INTERVAL)),
            JobState::DeadlineExceeded => {
                let message = "orchestration job exceeded its deadline".to_string();
                self.fail(task, "DeadlineExceeded", &message).await
            }
            JobState::Failed => {
                let mut task = task;
                let logs = self
                    .store
                    .job_logs(&job_key, LOG_TAIL_LINES)
                    .await
                    .unwrap_or_default();
                let message = match extract_result(&logs) {
                    Some(result) => {
                        Self::record_result(&mut task, &result);
                        result
                            .error
                            .unwrap_or_else(|| "orchestration job failed".to_string())
                    }
                    None if job.status.message.is_empty() => {
                        "orchestration job failed".to_string()
                    }
                    None => job.status.message.clone(),
                };
                self.fail(task, "JobFailed", &message).await
            }
            JobState::Succeeded => self.complete(task, &job_key).await,
        }
    }

    /// Finalizer cleanup: remove the Job and workspace claim, then release.
    async fn cleanup(&self, mut task: Task) -> Result<()> {
        let namespace = task.metadata.namespace.clone();
        self.store
            .delete(ResourceKind::Job, &ObjectRef::new(namespace.clone(), job_name(&task)))
            .await?;
        self.store
            .delete(
                ResourceKind::VolumeClaim,
                &ObjectRef::new(namespace, workspace_claim_name(&task)),
            )
            .await?;
        task.metadata.finalizers.retain(|f| f != TASK_FINALIZER);
        self.store.update(Object::Task(task)).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for TaskReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Task
    }

    fn name(&self) -> &'static str {
        "task"
    }

    fn watched_kinds(&self) -> Vec<ResourceKind> {
        vec![ResourceKind::Job]
    }

    async fn map_related(&self, event: &WatchEvent) -> Result<Vec<ObjectRef>> {
        match event {
            WatchEvent::Applied(_) => Ok(owner_keys(event, ResourceKind::Task)),
            // Jobs are named `<task>-run`; map a deletion back to its owner.
            WatchEvent::Deleted(_, key) => Ok(key
                .name
                .strip_suffix("-run")
                .map(|task| vec![ObjectRef::new(key.namespace.clone(), task)])
                .unwrap_or_default()),
        }
    }

    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let Some(obj) = self.store.get(ResourceKind::Task, key).await? else {
            return Ok(Action::Done);
        };
        let Some(mut task) = obj.into_task() else {
            return Ok(Action::Done);
        };

        if task.metadata.is_deleting() {
            if task.metadata.has_finalizer(TASK_FINALIZER) {
                self.cleanup(task).await?;
            }
            return Ok(Action::Done);
        }

        // First observation: install the cleanup finalizer. The update event
        // re-enqueues us to continue.
        if !task.metadata.has_finalizer(TASK_FINALIZER) {
            task.metadata.finalizers.push(TASK_FINALIZER.to_string());
            self.store.update(Object::Task(task)).await?;
            return Ok(Action::Done);
        }

        // Completed and Failed are terminal.
        if task.status.phase.is_terminal() {
            return Ok(Action::Done);
        }

        if task.spec.paused {
            if task.status.phase != TaskPhase::Paused {
                let generation = task.metadata.generation;
                task.status.phase = TaskPhase::Paused;
                set_condition(
                    &mut task.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::False,
                    "Paused",
                    "task is paused",
                    generation,
                );
                self.store.update_status(Object::Task(task)).await?;
            }
            return Ok(Action::Done);
        }

        if task.status.phase == TaskPhase::Paused {
            let generation = task.metadata.generation;
            task.status.phase = TaskPhase::Running;
            task.status.consecutive_failures = 0;
            set_condition(
                &mut task.status.conditions,
                CONDITION_READY,
                ConditionStatus::False,
                "JobRunning",
                "task resumed",
                generation,
            );
            self.store.update_status(Object::Task(task)).await?;
            return Ok(Action::RequeueAfter(JOB_POLL_INTERVAL));
        }

        match task.status.phase {
            TaskPhase::Pending => self.start(task).await,
            TaskPhase::Running => self.poll(task).await,
            _ => Ok(Action::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use weft_types::{
        AgentSpec, ModelSpec, TaskLimits, TaskSource, TaskSpec,
    };

    fn ready_agent(namespace: &str, name: &str) -> Agent {
        let mut agent = Agent::new(
            namespace,
            name,
            AgentSpec {
                prompt: "p".to_string(),
                model: ModelSpec {
                    provider: "anthropic".to_string(),
                    model_id: "m".to_string(),
                    temperature: None,
                    max_tokens: None,
                    endpoint: None,
                },
                tool_refs: Vec::new(),
                policy: Default::default(),
                network: Default::default(),
                replicas: 1,
                resources: None,
                image: None,
                env: Vec::new(),
                env_from: Vec::new(),
                tools: Vec::new(),
            },
        );
        agent.status.ready = true;
        agent.status.endpoint = format!("{name}.{namespace}.svc.cluster.local:8080");
        agent
    }

    fn sample_task(limits: TaskLimits) -> Task {
        Task::new(
            "prod",
            "migrate",
            TaskSpec {
                worker_ref: "alpha".to_string(),
                orchestrator_ref: None,
                task_source: TaskSource {
                    r#type: TaskSourceType::Inline,
                    content: Some(r#"{"tasks": [{"id": 1}, {"id": 2}]}"#.to_string()),
                    name: None,
                    key: None,
                },
                limits,
                quality_gates: Vec::new(),
                git: None,
                paused: false,
                context: Default::default(),
            },
        )
    }

    async fn setup_running(store: &Arc<MemoryStore>, reconciler: &TaskReconciler) -> ObjectRef {
        store
            .create(Object::Agent(ready_agent("prod", "alpha")))
            .await
            .unwrap();
        store
            .create(Object::Task(sample_task(TaskLimits {
                max_job_recreations: 2,
                ..Default::default()
            })))
            .await
            .unwrap();

        let key = ObjectRef::new("prod", "migrate");
        // Pass 1: finalizer, pass 2: Pending -> Running
        reconciler.reconcile(&key).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        key
    }

    async fn fetch(store: &Arc<MemoryStore>, key: &ObjectRef) -> Task {
        store
            .get(ResourceKind::Task, key)
            .await
            .unwrap()
            .unwrap()
            .into_task()
            .unwrap()
    }

    #[tokio::test]
    async fn test_pending_to_running_creates_job_and_claim() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;

        let task = fetch(&store, &key).await;
        assert_eq!(task.status.phase, TaskPhase::Running);
        assert_eq!(task.status.total_tasks, 2);
        assert!(task.status.started_at.is_some());
        assert!(task.metadata.has_finalizer(TASK_FINALIZER));

        assert!(store
            .get(ResourceKind::Job, &ObjectRef::new("prod", "migrate-run"))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get(ResourceKind::VolumeClaim, &ObjectRef::new("prod", "migrate-workspace"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unresolved_worker_stays_pending() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        store
            .create(Object::Task(sample_task(Default::default())))
            .await
            .unwrap();

        let key = ObjectRef::new("prod", "migrate");
        reconciler.reconcile(&key).await.unwrap();
        let action = reconciler.reconcile(&key).await.unwrap();
        assert_eq!(action, Action::RequeueAfter(FAILURE_REQUEUE));

        let task = fetch(&store, &key).await;
        assert_eq!(task.status.phase, TaskPhase::Pending);
        assert_eq!(task.status.conditions[0].reason, "AgentResolutionFailed");
    }

    #[tokio::test]
    async fn test_success_with_marker_completes() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;

        let job_key = ObjectRef::new("prod", "migrate-run");
        store
            .set_job_logs(
                &job_key,
                "working...\nORCHESTRATOR_RESULT:{\"passed\":true,\"completedTasks\":2,\"totalTasks\":2,\"iterations\":3,\"commitSha\":\"abc\"}\n",
            )
            .await;
        store
            .set_job_state(&job_key, JobState::Succeeded, "")
            .await
            .unwrap();

        reconciler.reconcile(&key).await.unwrap();
        let task = fetch(&store, &key).await;
        assert_eq!(task.status.phase, TaskPhase::Completed);
        assert_eq!(task.status.completed_tasks, 2);
        assert_eq!(task.status.current_iteration, 3);
        assert_eq!(task.status.last_commit_sha, "abc");
        assert!(task.status.completed_at.is_some());

        // Terminal: further passes leave the phase alone
        reconciler.reconcile(&key).await.unwrap();
        assert_eq!(fetch(&store, &key).await.status.phase, TaskPhase::Completed);
    }

    #[tokio::test]
    async fn test_success_without_marker_completes_with_note() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;

        let job_key = ObjectRef::new("prod", "migrate-run");
        store.set_job_logs(&job_key, "no marker here\n").await;
        store
            .set_job_state(&job_key, JobState::Succeeded, "")
            .await
            .unwrap();

        reconciler.reconcile(&key).await.unwrap();
        let task = fetch(&store, &key).await;
        assert_eq!(task.status.phase, TaskPhase::Completed);
        assert!(task.status.message.contains("extraction failed"));
    }

    #[tokio::test]
    async fn test_failed_result_fails_task() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;

        let job_key = ObjectRef::new("prod", "migrate-run");
        store
            .set_job_logs(
                &job_key,
                "ORCHESTRATOR_RESULT:{\"passed\":false,\"error\":\"quality gate lint failed\"}\n",
            )
            .await;
        store
            .set_job_state(&job_key, JobState::Succeeded, "")
            .await
            .unwrap();

        reconciler.reconcile(&key).await.unwrap();
        let task = fetch(&store, &key).await;
        assert_eq!(task.status.phase, TaskPhase::Failed);
        assert!(task.status.message.contains("quality gate lint failed"));

        // Failure path cleans up the Job
        assert!(store
            .get(ResourceKind::Job, &job_key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_job_lost_recreation_budget() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;
        let job_key = ObjectRef::new("prod", "migrate-run");

        // Lose the job repeatedly: each poll drops to Pending, each start
        // recreates, until the budget (2) is exhausted.
        for _ in 0..2 {
            store.delete(ResourceKind::Job, &job_key).await.unwrap();
            reconciler.reconcile(&key).await.unwrap(); // poll: notices loss
            reconciler.reconcile(&key).await.unwrap(); // start: recreates
            assert!(store
                .get(ResourceKind::Job, &job_key)
                .await
                .unwrap()
                .is_some());
        }

        store.delete(ResourceKind::Job, &job_key).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();

        let task = fetch(&store, &key).await;
        assert_eq!(task.status.phase, TaskPhase::Failed);
        assert!(task.status.message.contains("lost"));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;

        let mut task = fetch(&store, &key).await;
        task.spec.paused = true;
        store.update(Object::Task(task)).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        assert_eq!(fetch(&store, &key).await.status.phase, TaskPhase::Paused);

        let mut task = fetch(&store, &key).await;
        task.spec.paused = false;
        store.update(Object::Task(task)).await.unwrap();
        reconciler.reconcile(&key).await.unwrap();
        let resumed = fetch(&store, &key).await;
        assert_eq!(resumed.status.phase, TaskPhase::Running);
        assert_eq!(resumed.status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_deletion_cleans_up_and_releases_finalizer() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;

        store.delete(ResourceKind::Task, &key).await.unwrap();
        // Finalizer keeps it visible until cleanup runs
        assert!(fetch(&store, &key).await.metadata.is_deleting());

        reconciler.reconcile(&key).await.unwrap();
        assert!(store.get(ResourceKind::Task, &key).await.unwrap().is_none());
        assert!(store
            .get(ResourceKind::Job, &ObjectRef::new("prod", "migrate-run"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get(ResourceKind::VolumeClaim, &ObjectRef::new("prod", "migrate-workspace"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_deadline_exceeded_fails() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = TaskReconciler::new(store.clone() as Arc<dyn Store>);
        let key = setup_running(&store, &reconciler).await;

        let job_key = ObjectRef::new("prod", "migrate-run");
        store
            .set_job_state(&job_key, JobState::DeadlineExceeded, "deadline exceeded")
            .await
            .unwrap();
        reconciler.reconcile(&key).await.unwrap();

        let task = fetch(&store, &key).await;
        assert_eq!(task.status.phase, TaskPhase::Failed);
        assert!(task.status.message.contains("deadline"));
    }
}
