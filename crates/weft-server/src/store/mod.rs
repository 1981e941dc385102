// crates/weft-server/src/store/mod.rs
// Abstract resource store (the orchestrator API collaborator)
//
// The reconcilers and the gateway's agent cache talk to the orchestrator
// exclusively through this trait. The in-memory implementation backs the dev
// mode and the whole test suite; a cluster-backed client is a deployment
// concern outside this repo.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use weft_types::workload::Secret;
use weft_types::{
    Agent, ConfigBlob, Deployment, Job, ObjectMeta, ObjectRef, ResourceKind, Route, Service,
    ServiceAccount, Task, Tool, VolumeClaim,
};

/// Any object the store can hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Object {
    Agent(Agent),
    Tool(Tool),
    Route(Route),
    Task(Task),
    Deployment(Deployment),
    Service(Service),
    ConfigBlob(ConfigBlob),
    ServiceAccount(ServiceAccount),
    VolumeClaim(VolumeClaim),
    Job(Job),
    Secret(Secret),
}

macro_rules! object_accessors {
    ($(($variant:ident, $ty:ty, $as_fn:ident, $into_fn:ident)),+ $(,)?) => {
        impl Object {
            pub fn kind(&self) -> ResourceKind {
                match self {
                    $(Object::$variant(_) => ResourceKind::$variant,)+
                }
            }

            pub fn metadata(&self) -> &ObjectMeta {
                match self {
                    $(Object::$variant(o) => &o.metadata,)+
                }
            }

            pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $(Object::$variant(o) => &mut o.metadata,)+
                }
            }

            $(
                pub fn $as_fn(&self) -> Option<&$ty> {
                    match self {
                        Object::$variant(o) => Some(o),
                        _ => None,
                    }
                }

                pub fn $into_fn(self) -> Option<$ty> {
                    match self {
                        Object::$variant(o) => Some(o),
                        _ => None,
                    }
                }
            )+
        }

        $(
            impl From<$ty> for Object {
                fn from(o: $ty) -> Self {
                    Object::$variant(o)
                }
            }
        )+
    };
}

object_accessors!(
    (Agent, Agent, as_agent, into_agent),
    (Tool, Tool, as_tool, into_tool),
    (Route, Route, as_route, into_route),
    (Task, Task, as_task, into_task),
    (Deployment, Deployment, as_deployment, into_deployment),
    (Service, Service, as_service, into_service),
    (ConfigBlob, ConfigBlob, as_config_blob, into_config_blob),
    (ServiceAccount, ServiceAccount, as_service_account, into_service_account),
    (VolumeClaim, VolumeClaim, as_volume_claim, into_volume_claim),
    (Job, Job, as_job, into_job),
    (Secret, Secret, as_secret, into_secret),
);

impl Object {
    pub fn object_ref(&self) -> ObjectRef {
        self.metadata().object_ref()
    }
}

/// A single change delivered on a watch stream.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Created, updated, or re-delivered on resync.
    Applied(Object),
    Deleted(ResourceKind, ObjectRef),
}

impl WatchEvent {
    pub fn kind(&self) -> ResourceKind {
        match self {
            WatchEvent::Applied(obj) => obj.kind(),
            WatchEvent::Deleted(kind, _) => *kind,
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        match self {
            WatchEvent::Applied(obj) => obj.object_ref(),
            WatchEvent::Deleted(_, key) => key.clone(),
        }
    }
}

/// Abstract operations against the resource store.
///
/// `update` replaces the spec side of an object and is user-driven;
/// `update_status` is reconciler-owned and fails with a conflict when the
/// caller's copy is stale (the caller requeues, never retries blindly).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, kind: ResourceKind, key: &ObjectRef) -> Result<Option<Object>>;

    async fn list(&self, kind: ResourceKind, namespace: Option<&str>) -> Result<Vec<Object>>;

    async fn create(&self, obj: Object) -> Result<Object>;

    async fn update(&self, obj: Object) -> Result<Object>;

    async fn update_status(&self, obj: Object) -> Result<Object>;

    /// Background propagation: children linked by owner references are
    /// garbage-collected after the owner is gone.
    async fn delete(&self, kind: ResourceKind, key: &ObjectRef) -> Result<()>;

    fn watch(&self, kind: ResourceKind) -> broadcast::Receiver<WatchEvent>;

    /// Tail of the log stream for the Job's final pod.
    async fn job_logs(&self, key: &ObjectRef, tail: usize) -> Result<String>;
}
