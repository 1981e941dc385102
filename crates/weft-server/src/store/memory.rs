// crates/weft-server/src/store/memory.rs
// In-memory resource store with watch streams
//
// Mirrors the orchestrator API semantics the reconcilers rely on: resource
// versions bump on every write, stale status updates fail with a conflict,
// deletes are finalizer-gated, and owner references drive garbage collection.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use uuid::Uuid;

use crate::error::{Result, WeftError};
use crate::store::{Object, Store, WatchEvent};
use weft_types::workload::JobState;
use weft_types::{ObjectRef, ResourceKind};

const WATCH_BUFFER: usize = 256;

type Key = (ResourceKind, ObjectRef);

pub struct MemoryStore {
    objects: RwLock<HashMap<Key, Object>>,
    /// Log text per Job, provided by the test harness or dev runner.
    job_logs: RwLock<HashMap<ObjectRef, String>>,
    watchers: HashMap<ResourceKind, broadcast::Sender<WatchEvent>>,
    version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut watchers = HashMap::new();
        for kind in ResourceKind::ALL {
            let (tx, _) = broadcast::channel(WATCH_BUFFER);
            watchers.insert(kind, tx);
        }
        Self {
            objects: RwLock::new(HashMap::new()),
            job_logs: RwLock::new(HashMap::new()),
            watchers,
            version: AtomicU64::new(1),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine
        if let Some(tx) = self.watchers.get(&event.kind()) {
            let _ = tx.send(event);
        }
    }

    /// Copy the stored status side into `new` so spec updates never clobber
    /// reconciler-owned fields.
    fn preserve_status(new: &mut Object, stored: &Object) {
        match (new, stored) {
            (Object::Agent(n), Object::Agent(s)) => n.status = s.status.clone(),
            (Object::Tool(n), Object::Tool(s)) => n.status = s.status.clone(),
            (Object::Route(n), Object::Route(s)) => n.status = s.status.clone(),
            (Object::Task(n), Object::Task(s)) => n.status = s.status.clone(),
            (Object::Job(n), Object::Job(s)) => n.status = s.status.clone(),
            (Object::Deployment(n), Object::Deployment(s)) => {
                n.available_replicas = s.available_replicas
            }
            _ => {}
        }
    }

    /// Copy only the status side of `from` into `into`.
    fn apply_status(into: &mut Object, from: Object) {
        match (into, from) {
            (Object::Agent(s), Object::Agent(n)) => s.status = n.status,
            (Object::Tool(s), Object::Tool(n)) => s.status = n.status,
            (Object::Route(s), Object::Route(n)) => s.status = n.status,
            (Object::Task(s), Object::Task(n)) => s.status = n.status,
            (Object::Job(s), Object::Job(n)) => s.status = n.status,
            (Object::Deployment(s), Object::Deployment(n)) => {
                s.available_replicas = n.available_replicas
            }
            _ => {}
        }
    }

    /// Remove every object owned (transitively) by the given uid.
    async fn collect_garbage(&self, owner_uid: &str) {
        let mut orphaned: Vec<(Key, String)> = Vec::new();
        {
            let objects = self.objects.read().await;
            for ((kind, key), obj) in objects.iter() {
                if obj
                    .metadata()
                    .owner_references
                    .iter()
                    .any(|r| r.uid == owner_uid)
                {
                    orphaned.push(((*kind, key.clone()), obj.metadata().uid.clone()));
                }
            }
        }
        for ((kind, key), uid) in orphaned {
            {
                let mut objects = self.objects.write().await;
                objects.remove(&(kind, key.clone()));
            }
            self.emit(WatchEvent::Deleted(kind, key));
            Box::pin(self.collect_garbage(&uid)).await;
        }
    }

    /// Re-deliver `Applied` for every live object until shutdown. The
    /// reconcilers treat re-delivery as a no-op unless state drifted.
    pub fn spawn_resync(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let objects = store.objects.read().await;
                        for obj in objects.values() {
                            store.emit(WatchEvent::Applied(obj.clone()));
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Test/dev helper: simulate the scheduler marking worker replicas
    /// available.
    pub async fn set_deployment_available(&self, key: &ObjectRef, available: u32) -> Result<()> {
        let updated = {
            let mut objects = self.objects.write().await;
            let obj = objects
                .get_mut(&(ResourceKind::Deployment, key.clone()))
                .ok_or_else(|| WeftError::NotFound(format!("Deployment {key}")))?;
            if let Object::Deployment(dep) = obj {
                dep.available_replicas = available;
            }
            obj.metadata_mut().resource_version = self.next_version();
            obj.clone()
        };
        self.emit(WatchEvent::Applied(updated));
        Ok(())
    }

    /// Test/dev helper: simulate the orchestrator finishing a Job.
    pub async fn set_job_state(&self, key: &ObjectRef, state: JobState, message: &str) -> Result<()> {
        let updated = {
            let mut objects = self.objects.write().await;
            let obj = objects
                .get_mut(&(ResourceKind::Job, key.clone()))
                .ok_or_else(|| WeftError::NotFound(format!("Job {key}")))?;
            if let Object::Job(job) = obj {
                job.status.state = state;
                job.status.message = message.to_string();
            }
            obj.metadata_mut().resource_version = self.next_version();
            obj.clone()
        };
        self.emit(WatchEvent::Applied(updated));
        Ok(())
    }

    /// Test/dev helper: set the log text returned for a Job's pod.
    pub async fn set_job_logs(&self, key: &ObjectRef, logs: impl Into<String>) {
        self.job_logs.write().await.insert(key.clone(), logs.into());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectRef) -> Result<Option<Object>> {
        let objects = self.objects.read().await;
        Ok(objects.get(&(kind, key.clone())).cloned())
    }

    async fn list(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<Object>> {
        let objects = self.objects.read().await;
        let mut items: Vec<Object> = objects
            .iter()
            .filter(|((k, key), _)| {
                *k == kind && namespace.is_none_or(|ns| key.namespace == ns)
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        items.sort_by(|a, b| a.object_ref().cmp(&b.object_ref()));
        Ok(items)
    }

    async fn create(&self, mut obj: Object) -> Result<Object> {
        let key = (obj.kind(), obj.object_ref());
        let created = {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&key) {
                return Err(WeftError::Conflict(format!(
                    "{} {} already exists",
                    key.0, key.1
                )));
            }
            let meta = obj.metadata_mut();
            meta.uid = Uuid::new_v4().to_string();
            meta.resource_version = self.next_version();
            meta.generation = 1;
            objects.insert(key, obj.clone());
            obj
        };
        self.emit(WatchEvent::Applied(created.clone()));
        Ok(created)
    }

    async fn update(&self, mut obj: Object) -> Result<Object> {
        let key = (obj.kind(), obj.object_ref());
        let (updated, removed_uid) = {
            let mut objects = self.objects.write().await;
            let stored = objects
                .get(&key)
                .ok_or_else(|| WeftError::NotFound(format!("{} {}", key.0, key.1)))?
                .clone();

            Self::preserve_status(&mut obj, &stored);
            let stored_meta = stored.metadata();
            let deleting = stored_meta.is_deleting();
            let meta = obj.metadata_mut();
            meta.uid = stored_meta.uid.clone();
            meta.generation = stored_meta.generation + 1;
            meta.resource_version = self.next_version();
            if deleting && meta.deletion_timestamp.is_none() {
                meta.deletion_timestamp = stored_meta.deletion_timestamp;
            }

            // A deleting object whose finalizers drain is removed for real.
            if meta.is_deleting() && meta.finalizers.is_empty() {
                let uid = meta.uid.clone();
                objects.remove(&key);
                (obj, Some(uid))
            } else {
                objects.insert(key.clone(), obj.clone());
                (obj, None)
            }
        };

        if let Some(uid) = removed_uid {
            self.emit(WatchEvent::Deleted(key.0, key.1));
            self.collect_garbage(&uid).await;
        } else {
            self.emit(WatchEvent::Applied(updated.clone()));
        }
        Ok(updated)
    }

    async fn update_status(&self, obj: Object) -> Result<Object> {
        let key = (obj.kind(), obj.object_ref());
        let updated = {
            let mut objects = self.objects.write().await;
            let stored = objects
                .get_mut(&key)
                .ok_or_else(|| WeftError::NotFound(format!("{} {}", key.0, key.1)))?;
            if stored.metadata().resource_version != obj.metadata().resource_version {
                return Err(WeftError::Conflict(format!("{} {}", key.0, key.1)));
            }
            Self::apply_status(stored, obj);
            stored.metadata_mut().resource_version = self.next_version();
            stored.clone()
        };
        self.emit(WatchEvent::Applied(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectRef) -> Result<()> {
        enum Outcome {
            Gated(Object),
            Removed(String),
            Missing,
        }

        let outcome = {
            let mut objects = self.objects.write().await;
            match objects.get_mut(&(kind, key.clone())) {
                None => Outcome::Missing,
                Some(obj) if !obj.metadata().finalizers.is_empty() => {
                    let meta = obj.metadata_mut();
                    if meta.deletion_timestamp.is_none() {
                        meta.deletion_timestamp = Some(Utc::now());
                        meta.resource_version = self.next_version();
                    }
                    Outcome::Gated(obj.clone())
                }
                Some(obj) => {
                    let uid = obj.metadata().uid.clone();
                    objects.remove(&(kind, key.clone()));
                    Outcome::Removed(uid)
                }
            }
        };

        match outcome {
            Outcome::Missing => Ok(()),
            Outcome::Gated(obj) => {
                self.emit(WatchEvent::Applied(obj));
                Ok(())
            }
            Outcome::Removed(uid) => {
                self.emit(WatchEvent::Deleted(kind, key.clone()));
                self.collect_garbage(&uid).await;
                Ok(())
            }
        }
    }

    fn watch(&self, kind: ResourceKind) -> broadcast::Receiver<WatchEvent> {
        self.watchers
            .get(&kind)
            .expect("watcher registered for every kind")
            .subscribe()
    }

    async fn job_logs(&self, key: &ObjectRef, tail: usize) -> Result<String> {
        let logs = self.job_logs.read().await;
        let text = logs
            .get(key)
            .ok_or_else(|| WeftError::NotFound(format!("logs for Job {key}")))?;
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }
}
