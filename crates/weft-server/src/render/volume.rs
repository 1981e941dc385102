// crates/weft-server/src/render/volume.rs
// Workspace volume claim renderer

use weft_types::{ObjectMeta, ResourceKind, Task, VolumeClaim};

use super::{job::workspace_claim_name, owned_by};

const DEFAULT_WORKSPACE_STORAGE: &str = "10Gi";

/// Render the workspace claim shared between the clone init container and
/// the orchestrator across Job recreations.
pub fn render_workspace_claim(task: &Task) -> VolumeClaim {
    let mut meta = ObjectMeta::new(task.metadata.namespace.clone(), workspace_claim_name(task));
    owned_by(
        &mut meta,
        ResourceKind::Task,
        &task.metadata.name,
        &task.metadata.uid,
    );
    VolumeClaim {
        metadata: meta,
        storage: DEFAULT_WORKSPACE_STORAGE.to_string(),
        storage_class: String::new(),
    }
}
