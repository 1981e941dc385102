// crates/weft-server/src/render/mod.rs
// Pure descriptor renderers
//
// Every function in this module maps declared resources to orchestrator
// object values. No store access, no clocks, no randomness: byte-identical
// inputs must produce byte-identical descriptors, because the config hash
// derived here is what triggers worker rollouts.

pub mod config;
pub mod job;
pub mod volume;
pub mod workload;

pub use config::{config_blob_data, render_worker_config, worker_config_hash};
pub use job::render_orchestration_job;
pub use volume::render_workspace_claim;
pub use workload::{
    render_worker_config_blob, render_worker_deployment, render_worker_identity,
    render_worker_service,
};

use weft_types::{ObjectMeta, OwnerReference, ResourceKind};

/// Port every worker listens on.
pub const WORKER_PORT: u16 = 8080;

/// DNS suffix appended to worker service names.
pub const CLUSTER_SUFFIX: &str = "svc.cluster.local";

/// Default worker image when the Agent does not override it.
pub const DEFAULT_WORKER_IMAGE: &str = "ghcr.io/weftlabs/weft-worker:latest";

/// Default orchestrator image driving Task loops.
pub const DEFAULT_ORCHESTRATOR_IMAGE: &str = "ghcr.io/weftlabs/weft-orchestrator:latest";

/// Annotation key carrying the rendered config hash on the worker pod
/// template. The orchestrator's rolling update replaces pods when it changes.
pub const CONFIG_HASH_ANNOTATION: &str = "weft.io/config-hash";

/// Attach the parent's owner reference so the orchestrator garbage-collects
/// the child when the parent goes away.
pub fn owned_by(meta: &mut ObjectMeta, kind: ResourceKind, name: &str, uid: &str) {
    meta.owner_references.push(OwnerReference {
        kind,
        name: name.to_string(),
        uid: uid.to_string(),
    });
}

/// The worker service DNS name for an agent: `<name>.<namespace>.<suffix>`.
pub fn worker_endpoint(namespace: &str, name: &str) -> String {
    format!("{name}.{namespace}.{CLUSTER_SUFFIX}:{WORKER_PORT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_endpoint_shape() {
        assert_eq!(
            worker_endpoint("prod", "alpha"),
            "alpha.prod.svc.cluster.local:8080"
        );
    }
}
