// crates/weft-server/src/gateway/mcp/service.rs
// MCP method handlers
//
// Two transports share these semantics: one POST per request/response, or a
// long-lived event stream where POST bodies are answered over the stream.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::gateway::api::{dispatch, DispatchError};
use crate::gateway::state::GatewayState;
use weft_types::InvokeRequest;

use super::session::Session;
use super::{codes, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};

/// Schema used for agents that advertise no explicit tools.
fn default_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" }
        },
        "required": ["query"]
    })
}

/// First sentence of an agent prompt, capped at 200 chars.
fn prompt_description(prompt: &str) -> String {
    let sentence_end = prompt
        .find(['.', '!', '?'])
        .map(|i| i + 1)
        .unwrap_or(prompt.len());
    let sentence = prompt[..sentence_end].trim();
    let mut description: String = sentence.chars().take(200).collect();
    if description.is_empty() {
        description = "Invoke this agent".to_string();
    }
    description
}

/// Build the query for tools/call from the call arguments: a well-known
/// field when present, otherwise "key: value" lines for each string.
fn synthesize_query(arguments: &Value) -> String {
    for field in ["query", "question", "request", "description"] {
        if let Some(value) = arguments.get(field).and_then(Value::as_str) {
            return value.to_string();
        }
    }
    let Some(object) = arguments.as_object() else {
        return String::new();
    };
    object
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|v| format!("{key}: {v}")))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn handle_initialize(id: Value) -> JsonRpcResponse {
    JsonRpcResponse::success(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": true }
            },
            "serverInfo": {
                "name": "weft-gateway",
                "version": env!("CARGO_PKG_VERSION"),
            }
        }),
    )
}

async fn handle_tools_list(state: &GatewayState, id: Value) -> JsonRpcResponse {
    let mut tools = Vec::new();
    for (key, agent) in state.agents.ready_agents().await {
        if agent.tools.is_empty() {
            tools.push(json!({
                "name": key.name,
                "description": prompt_description(&agent.prompt),
                "inputSchema": default_input_schema(),
            }));
        } else {
            for tool in &agent.tools {
                tools.push(json!({
                    "name": format!("{}_{}", key.name, tool.name),
                    "description": tool.description,
                    "inputSchema": tool.input_schema.clone().unwrap_or_else(default_input_schema),
                }));
            }
        }
    }
    JsonRpcResponse::success(id, json!({ "tools": tools }))
}

/// Tool-level failure payload (distinct from a JSON-RPC error).
fn tool_error(id: Value, message: String) -> JsonRpcResponse {
    JsonRpcResponse::success(
        id,
        json!({
            "content": [{ "type": "text", "text": message }],
            "isError": true,
        }),
    )
}

async fn handle_tools_call(state: &GatewayState, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let params = params.unwrap_or(Value::Null);
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::failure(id, codes::INVALID_PARAMS, "missing tool name");
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    // `<agent>` or `<agent>_<tool>`; the split is at the first underscore.
    let (agent_name, _tool_name) = match name.split_once('_') {
        Some((agent, tool)) => (agent, Some(tool)),
        None => (name, None),
    };

    let Some((_, cached)) = state.agents.get_by_name(agent_name).await else {
        return JsonRpcResponse::failure(
            id,
            codes::INVALID_PARAMS,
            format!("unknown agent {agent_name:?}"),
        );
    };
    if !cached.ready {
        return tool_error(id, format!("agent {agent_name:?} is not ready"));
    }

    let query = synthesize_query(&arguments);
    let request = InvokeRequest {
        agent: Some(agent_name.to_string()),
        query,
        input: Some(arguments),
        ..Default::default()
    };

    let cancel = CancellationToken::new();
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let outcome = dispatch(state, &request, &correlation_id, HashMap::new(), &cancel).await;
    let outcome = match outcome {
        // Agents without routing rules are still callable over MCP: fall
        // back to a direct forward against the cached endpoint.
        Err(DispatchError::NoAgent(_)) | Err(DispatchError::NoRoute { .. }) => {
            direct_forward(state, &request, agent_name, &cached.endpoint, &cancel).await
        }
        other => other.map(|success| success.output),
    };

    match outcome {
        Ok(output) => JsonRpcResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": output.text }],
                "isError": false,
            }),
        ),
        Err(error) => tool_error(id, error.message()),
    }
}

/// Admission-guarded forward outside the route table, used when no rule
/// covers the agent. The pool is named after the agent.
async fn direct_forward(
    state: &GatewayState,
    request: &InvokeRequest,
    agent_name: &str,
    endpoint: &str,
    cancel: &CancellationToken,
) -> Result<crate::gateway::forward::ForwardOutput, DispatchError> {
    let table = state.table.snapshot().await;
    let circuit = table.defaults.circuit_breaker();
    let pool = state
        .admission
        .pool(&format!("mcp/{agent_name}"), &circuit)
        .await;
    let slot = pool.acquire(cancel).await.map_err(DispatchError::Admission)?;

    let timeout = Duration::from_millis(state.request_timeout_ms().await);
    let outcome = state
        .forwarder
        .forward(endpoint, request, timeout, cancel)
        .await;
    drop(slot);
    outcome.map_err(DispatchError::Upstream)
}

/// Dispatch one decoded JSON-RPC request. Returns None for notifications.
pub async fn handle(
    state: &GatewayState,
    request: JsonRpcRequest,
    session: Option<&Session>,
) -> Option<JsonRpcResponse> {
    let id = request.id.clone().unwrap_or(Value::Null);
    match request.method.as_str() {
        "initialize" => Some(handle_initialize(id).await),
        "initialized" | "notifications/initialized" => {
            if let Some(session) = session {
                session.mark_initialized();
            }
            None
        }
        "tools/list" => Some(handle_tools_list(state, id).await),
        "tools/call" => Some(handle_tools_call(state, id, request.params).await),
        "ping" => Some(JsonRpcResponse::success(id, json!({}))),
        _ if request.is_notification() => None,
        method => Some(JsonRpcResponse::failure(
            id,
            codes::METHOD_NOT_FOUND,
            format!("method {method:?} not found"),
        )),
    }
}
