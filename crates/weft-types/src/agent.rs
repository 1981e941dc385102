// crates/weft-types/src/agent.rs
// Agent resource: a declared AI worker definition

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{Condition, ObjectMeta};
use crate::workload::{EnvVar, EnvVarSource, ResourceRequirements};

/// Model configuration for an agent's worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Provider identifier (e.g. "anthropic", "openai").
    pub provider: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Override endpoint for self-hosted providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Reference to a Tool resource mounted into the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Functions to enable from the bundle; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enable: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disable: Vec<String>,
}

/// Runtime policy limits passed to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPolicy {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    /// Seconds before a worker request is abandoned.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_max_tool_calls() -> u32 {
    20
}

fn default_request_timeout() -> u64 {
    300
}

fn default_tool_timeout() -> u64 {
    60
}

fn default_max_concurrent() -> u32 {
    10
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            request_timeout: default_request_timeout(),
            tool_timeout: default_tool_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Egress allow lists rendered into the worker's network policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_cidrs: Vec<String>,
}

/// A callable function advertised by an agent or declared by a tool bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the function input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub prompt: String,
    pub model: ModelSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_refs: Vec<ToolRef>,
    #[serde(default)]
    pub policy: AgentPolicy,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Worker image override; the operator supplies a default otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvVarSource>,
    /// Functions this agent advertises over MCP.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDef>,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default)]
    pub ready: bool,
    /// `<name>.<namespace>.<cluster-suffix>:<port>` once the worker service
    /// exists and the deployment is available. Empty otherwise.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default)]
    pub available_replicas: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_hash: String,
    /// Mirror of `spec.tools` while ready; cleared otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A declared Agent as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub metadata: ObjectMeta,
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(namespace: &str, name: &str, spec: AgentSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: AgentStatus::default(),
        }
    }
}

/// Labels stamped on every object an Agent owns.
pub fn worker_labels(agent_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.weft.io/component".to_string(), "worker".to_string());
    labels.insert("app.weft.io/agent".to_string(), agent_name.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec() -> AgentSpec {
        serde_json::from_value(serde_json::json!({
            "prompt": "You are a helpful assistant.",
            "model": {"provider": "anthropic", "modelId": "claude-sonnet-4"}
        }))
        .unwrap()
    }

    #[test]
    fn test_spec_defaults() {
        let spec = minimal_spec();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.policy.max_tool_calls, 20);
        assert_eq!(spec.policy.request_timeout, 300);
        assert!(spec.tool_refs.is_empty());
    }

    #[test]
    fn test_status_endpoint_omitted_when_empty() {
        let status = AgentStatus::default();
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("endpoint").is_none());
    }

    #[test]
    fn test_worker_labels() {
        let labels = worker_labels("alpha");
        assert_eq!(labels.get("app.weft.io/agent").map(String::as_str), Some("alpha"));
    }
}
