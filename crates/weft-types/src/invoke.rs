// crates/weft-types/src/invoke.rs
// Gateway wire envelopes

use serde::{Deserialize, Serialize};

/// Client request to `POST /v1/invoke`, and the body the gateway forwards to
/// the selected worker's `/invoke`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    /// Explicit agent selection; bypasses intent matching when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub success: bool,
    pub result: serde_json::Value,
    pub agent: String,
    pub correlation_id: String,
    pub latency_ms: u64,
}

/// Error envelope for every gateway rejection path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_request_minimal() {
        let req: InvokeRequest = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        assert_eq!(req.query, "hi");
        assert!(req.agent.is_none());
        assert!(req.intent.is_none());
    }

    #[test]
    fn test_error_envelope_shape() {
        let err = ErrorResponse::new("no agent found", "c-1");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["correlationId"], "c-1");
    }
}
