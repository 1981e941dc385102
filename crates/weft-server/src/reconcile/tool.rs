// crates/weft-server/src/reconcile/tool.rs
// Tool reconciler: validates the bundle and publishes its functions

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::store::{Object, Store};
use weft_types::{set_condition, ConditionStatus, ObjectRef, ResourceKind, CONDITION_READY};

use super::{Action, Reconciler};

pub struct ToolReconciler {
    store: Arc<dyn Store>,
}

impl ToolReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reconciler for ToolReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Tool
    }

    fn name(&self) -> &'static str {
        "tool"
    }

    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let Some(obj) = self.store.get(ResourceKind::Tool, key).await? else {
            return Ok(Action::Done);
        };
        let Some(mut tool) = obj.into_tool() else {
            return Ok(Action::Done);
        };

        if tool.metadata.is_deleting() {
            return Ok(Action::Done);
        }

        let generation = tool.metadata.generation;
        let ready = !tool.spec.image.is_empty();
        if ready {
            tool.status.available_tools = tool.spec.tools.clone();
            set_condition(
                &mut tool.status.conditions,
                CONDITION_READY,
                ConditionStatus::True,
                "BundleValid",
                &format!("{} functions published", tool.status.available_tools.len()),
                generation,
            );
        } else {
            tool.status.available_tools.clear();
            set_condition(
                &mut tool.status.conditions,
                CONDITION_READY,
                ConditionStatus::False,
                "ImageMissing",
                "spec.image must be set",
                generation,
            );
        }
        tool.status.ready = ready;

        self.store.update_status(Object::Tool(tool)).await?;
        Ok(Action::Done)
    }
}
