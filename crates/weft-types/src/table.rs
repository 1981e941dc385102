// crates/weft-types/src/table.rs
// Compiled route table: the artifact the gateway consumes
//
// Emission discipline matters here: omitted fields stay absent in the blob
// (the consumer supplies defaults), and identical inputs must serialize to
// byte-identical output so the gateway only reloads on real changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::route::{BackendRef, CircuitBreakerConfig, RouteDefaults, RuleMatch};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledBackend {
    pub agent_name: String,
    pub namespace: String,
    /// `host:port` of the worker service; empty while the agent has none.
    #[serde(default)]
    pub endpoint: String,
    pub weight: u32,
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledRule {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub r#match: CompiledMatch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<CompiledBackend>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<CompiledBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_unmatched: Option<bool>,
}

impl TableDefaults {
    /// Resolve the admission configuration, supplying spec defaults for
    /// omitted fields.
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        let base = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            max_concurrent: self.max_concurrent.unwrap_or(base.max_concurrent).max(1),
            max_queue_size: self.max_queue_size.unwrap_or(base.max_queue_size),
            queue_timeout_ms: self.queue_timeout_ms.unwrap_or(base.queue_timeout_ms),
            request_timeout_ms: self
                .request_timeout_ms
                .unwrap_or(base.request_timeout_ms)
                .max(1_000),
        }
    }
}

/// Rules are stored in priority-descending order; ties preserve the original
/// rule order from the Route spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledRouteTable {
    #[serde(default)]
    pub rules: Vec<CompiledRule>,
    #[serde(default)]
    pub defaults: TableDefaults,
}

impl CompiledRouteTable {
    /// Serialize with stable indentation. Byte-identical inputs produce
    /// byte-identical output.
    pub fn to_blob(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_blob(blob: &str) -> serde_json::Result<Self> {
        serde_json::from_str(blob)
    }
}

impl From<&RuleMatch> for CompiledMatch {
    fn from(m: &RuleMatch) -> Self {
        Self {
            agent: m.agent.clone(),
            intent_regex: m.intent_regex.clone(),
            tenant_id: m.tenant_id.clone(),
            headers: m.headers.clone(),
        }
    }
}

/// Copy the default-circuit-breaker knobs from a Route spec, preserving
/// absence so the blob only carries what the user declared.
pub fn table_defaults_from_route(
    defaults: &RouteDefaults,
    backend: Option<CompiledBackend>,
) -> TableDefaults {
    let cb = defaults.circuit_breaker.as_ref();
    TableDefaults {
        backend,
        max_concurrent: cb.map(|c| c.max_concurrent),
        max_queue_size: cb.map(|c| c.max_queue_size),
        queue_timeout_ms: cb.map(|c| c.queue_timeout_ms),
        request_timeout_ms: cb.map(|c| c.request_timeout_ms),
        reject_unmatched: defaults.reject_unmatched.then_some(true),
    }
}

/// Weight default applied at compile time (spec default is 100).
pub fn effective_weight(backend: &BackendRef) -> u32 {
    backend.weight.unwrap_or(100).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteRule;

    fn sample_table() -> CompiledRouteTable {
        CompiledRouteTable {
            rules: vec![CompiledRule {
                name: "r".to_string(),
                priority: 10,
                r#match: CompiledMatch {
                    agent: Some("alpha".to_string()),
                    ..Default::default()
                },
                backends: vec![CompiledBackend {
                    agent_name: "alpha".to_string(),
                    namespace: "prod".to_string(),
                    endpoint: "alpha.prod.svc.cluster.local:8080".to_string(),
                    weight: 100,
                    ready: true,
                }],
            }],
            defaults: TableDefaults::default(),
        }
    }

    #[test]
    fn test_blob_is_deterministic() {
        let a = sample_table().to_blob().unwrap();
        let b = sample_table().to_blob().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_blob_roundtrip() {
        let table = sample_table();
        let blob = table.to_blob().unwrap();
        assert_eq!(CompiledRouteTable::from_blob(&blob).unwrap(), table);
    }

    #[test]
    fn test_omitted_match_fields_absent() {
        let blob = sample_table().to_blob().unwrap();
        assert!(!blob.contains("intentRegex"));
        assert!(!blob.contains("tenantId"));
    }

    #[test]
    fn test_defaults_resolution_floors() {
        let defaults = TableDefaults {
            max_concurrent: Some(0),
            request_timeout_ms: Some(10),
            ..Default::default()
        };
        let cb = defaults.circuit_breaker();
        assert_eq!(cb.max_concurrent, 1);
        assert_eq!(cb.request_timeout_ms, 1_000);
        assert_eq!(cb.max_queue_size, 50);
    }

    #[test]
    fn test_effective_weight() {
        let rule: RouteRule = serde_json::from_value(serde_json::json!({
            "name": "r",
            "backends": [{"agentRef": "a"}, {"agentRef": "b", "weight": 20}]
        }))
        .unwrap();
        assert_eq!(effective_weight(&rule.backends[0]), 100);
        assert_eq!(effective_weight(&rule.backends[1]), 20);
    }
}
