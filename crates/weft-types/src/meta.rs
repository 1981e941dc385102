// crates/weft-types/src/meta.rs
// Object metadata shared by every declared resource

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The `Ready` condition type maintained by every reconciler.
pub const CONDITION_READY: &str = "Ready";

/// Resource kinds known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Agent,
    Tool,
    Route,
    Task,
    Deployment,
    Service,
    ConfigBlob,
    ServiceAccount,
    VolumeClaim,
    Job,
    Secret,
}

impl ResourceKind {
    /// Every kind the store serves, in watch-registration order.
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Agent,
        ResourceKind::Tool,
        ResourceKind::Route,
        ResourceKind::Task,
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::ConfigBlob,
        ResourceKind::ServiceAccount,
        ResourceKind::VolumeClaim,
        ResourceKind::Job,
        ResourceKind::Secret,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Agent => "Agent",
            ResourceKind::Tool => "Tool",
            ResourceKind::Route => "Route",
            ResourceKind::Task => "Task",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::ConfigBlob => "ConfigBlob",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::VolumeClaim => "VolumeClaim",
            ResourceKind::Job => "Job",
            ResourceKind::Secret => "Secret",
        };
        f.write_str(name)
    }
}

/// Namespace + name pair identifying an object within a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference from a child object to the parent that owns it. The store
/// garbage-collects children once the referenced owner is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: ResourceKind,
    pub name: String,
    pub uid: String,
}

/// Metadata carried by every object in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Bumped by the store on every write. Status updates against a stale
    /// version fail with a conflict.
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the store on every spec write (not status).
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.namespace.clone(), self.name.clone())
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single status condition. Reconcilers keep exactly one entry per `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    /// Machine-readable reason (CamelCase).
    pub reason: String,
    /// Human-readable detail.
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub observed_generation: u64,
}

/// Upsert a condition in place, keeping one entry per type. The transition
/// time only moves when the status flips.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    observed_generation: u64,
) {
    let now = Utc::now();
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status;
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
            observed_generation,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::new("prod", "alpha");
        assert_eq!(r.to_string(), "prod/alpha");
    }

    #[test]
    fn test_set_condition_upserts_single_entry() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, CONDITION_READY, ConditionStatus::False, "Pending", "starting", 1);
        set_condition(&mut conditions, CONDITION_READY, ConditionStatus::True, "Available", "ok", 2);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_eq!(conditions[0].reason, "Available");
        assert_eq!(conditions[0].observed_generation, 2);
    }

    #[test]
    fn test_set_condition_transition_time_only_moves_on_flip() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, CONDITION_READY, ConditionStatus::True, "Available", "ok", 1);
        let first = conditions[0].last_transition_time;
        set_condition(&mut conditions, CONDITION_READY, ConditionStatus::True, "Available", "still ok", 2);
        assert_eq!(conditions[0].last_transition_time, first);
    }

    #[test]
    fn test_meta_finalizer_helpers() {
        let mut meta = ObjectMeta::new("ns", "obj");
        assert!(!meta.has_finalizer("weft.io/task-cleanup"));
        meta.finalizers.push("weft.io/task-cleanup".to_string());
        assert!(meta.has_finalizer("weft.io/task-cleanup"));
        assert!(!meta.is_deleting());
    }
}
