// crates/weft-types/src/tool.rs
// Tool resource: a bundled library of callable functions

use serde::{Deserialize, Serialize};

use crate::agent::ToolDef;
use crate::meta::{Condition, ObjectMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Image carrying the bundle files. A Tool with an empty image is never
    /// ready and blocks any Agent that references it.
    pub image: String,
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,
    /// Module inside the bundle the worker loads first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_module: Option<String>,
    /// Functions the bundle declares.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub metadata: ObjectMeta,
    pub spec: ToolSpec,
    #[serde(default)]
    pub status: ToolStatus,
}

impl Tool {
    pub fn new(namespace: &str, name: &str, spec: ToolSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: ToolStatus::default(),
        }
    }
}
