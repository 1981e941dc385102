// crates/weft-types/src/route.rs
// Route resource: declared request -> agent mapping rules

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{Condition, ObjectMeta};

/// Match criteria for a rule. Empty fields are wildcards; every non-empty
/// criterion must hold for the rule to match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Weighted reference to an Agent backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    pub agent_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Relative weight in [0,100]. Defaults to 100 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub r#match: RuleMatch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<BackendRef>,
}

/// Per-route admission limits applied by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u32,
    /// Milliseconds a request may wait for a slot.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Milliseconds before the downstream forward is abandoned.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

pub fn default_max_concurrent() -> u32 {
    100
}

pub fn default_max_queue_size() -> u32 {
    50
}

pub fn default_queue_timeout_ms() -> u64 {
    30_000
}

pub fn default_request_timeout_ms() -> u64 {
    300_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            queue_timeout_ms: default_queue_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefaults {
    /// Fallback backend when no rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Reject unmatched requests with bad-request instead of not-found.
    #[serde(default)]
    pub reject_unmatched: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RouteRule>,
    #[serde(default)]
    pub defaults: RouteDefaults,
}

/// Resolved readiness of a referenced backend, surfaced on status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub agent_ref: String,
    pub namespace: String,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub active_rules: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<BackendStatus>,
    /// Name of the blob the compiled table was published to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compiled_config_map: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub metadata: ObjectMeta,
    pub spec: RouteSpec,
    #[serde(default)]
    pub status: RouteStatus,
}

impl Route {
    pub fn new(namespace: &str, name: &str, spec: RouteSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: RouteStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_defaults() {
        let cb: CircuitBreakerConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cb.max_concurrent, 100);
        assert_eq!(cb.max_queue_size, 50);
        assert_eq!(cb.queue_timeout_ms, 30_000);
        assert_eq!(cb.request_timeout_ms, 300_000);
    }

    #[test]
    fn test_backend_weight_absent_vs_zero() {
        let absent: BackendRef =
            serde_json::from_value(serde_json::json!({"agentRef": "a"})).unwrap();
        assert_eq!(absent.weight, None);
        let zero: BackendRef =
            serde_json::from_value(serde_json::json!({"agentRef": "a", "weight": 0})).unwrap();
        assert_eq!(zero.weight, Some(0));
    }

    #[test]
    fn test_rule_match_roundtrip() {
        let rule = RouteRule {
            name: "cost".to_string(),
            priority: 100,
            r#match: RuleMatch {
                intent_regex: Some("(?i)cost".to_string()),
                ..Default::default()
            },
            backends: vec![BackendRef {
                agent_ref: "billing".to_string(),
                namespace: None,
                weight: Some(80),
            }],
        };
        let json = serde_json::to_string(&rule).unwrap();
        let back: RouteRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
