// crates/weft-server/src/render/config.rs
// Worker configuration rendering and hashing

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::Result;
use weft_types::{Agent, AgentPolicy, ModelSpec, NetworkSpec, ToolDef, Tool};

/// The configuration document projected into every worker pod. Key order is
/// fixed by the struct layout and all maps are BTreeMaps, so serialization is
/// deterministic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub agent: String,
    pub namespace: String,
    pub prompt: String,
    pub model: ModelSpec,
    pub policy: AgentPolicy,
    pub network: NetworkSpec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_bundles: Vec<BundleConfig>,
}

/// One resolved Tool bundle with the agent's enable/disable lists passed
/// through untouched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleConfig {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_module: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enable: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disable: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
}

/// Render the configuration JSON for an agent and its resolved tools.
///
/// Tools must be passed in `tool_refs` order. Output uses two-space
/// indentation with stable key ordering; byte-identical inputs produce
/// byte-identical output.
pub fn render_worker_config(agent: &Agent, tools: &[Tool]) -> Result<String> {
    let mut bundles = Vec::with_capacity(tools.len());
    for (tool_ref, tool) in agent.spec.tool_refs.iter().zip(tools) {
        bundles.push(BundleConfig {
            name: tool.metadata.name.clone(),
            image: tool.spec.image.clone(),
            entry_module: tool.spec.entry_module.clone(),
            enable: tool_ref.enable.clone(),
            disable: tool_ref.disable.clone(),
            tools: tool.spec.tools.clone(),
        });
    }

    let config = WorkerConfig {
        agent: agent.metadata.name.clone(),
        namespace: agent.metadata.namespace.clone(),
        prompt: agent.spec.prompt.clone(),
        model: agent.spec.model.clone(),
        policy: agent.spec.policy.clone(),
        network: agent.spec.network.clone(),
        tools: agent.spec.tools.clone(),
        tool_bundles: bundles,
    };

    Ok(serde_json::to_string_pretty(&config)?)
}

/// First 8 bytes of the SHA-256 of the rendered config, lowercase hex.
pub fn worker_config_hash(rendered: &str) -> String {
    let digest = Sha256::digest(rendered.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// The data map stored in the worker's configuration blob.
pub fn config_blob_data(rendered: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert("config.json".to_string(), rendered.to_string());
    data
}
