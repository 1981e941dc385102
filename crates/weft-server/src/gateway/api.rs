// crates/weft-server/src/gateway/api.rs
// HTTP route handlers for the dispatcher

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::gateway::admission::AdmissionError;
use crate::gateway::forward::{ForwardError, ForwardOutput};
use crate::gateway::matcher::{match_request, MatchOutcome, MatchRequest};
use crate::gateway::metrics::{self, error_type};
use crate::gateway::selector::select_backend;
use crate::gateway::state::GatewayState;
use weft_types::{ErrorResponse, InvokeRequest, InvokeResponse};

/// Dispatch failure classes, mapped to status codes and metric labels.
#[derive(Debug)]
pub enum DispatchError {
    Invalid(String),
    NoRoute { reject: bool },
    NoAgent(String),
    NoBackend,
    Admission(AdmissionError),
    Upstream(ForwardError),
}

impl DispatchError {
    pub fn error_type(&self) -> &'static str {
        match self {
            DispatchError::Invalid(_) => error_type::INVALID_REQUEST,
            DispatchError::NoRoute { .. } => error_type::NO_ROUTE_MATCH,
            DispatchError::NoAgent(_) => error_type::NO_AGENT,
            DispatchError::NoBackend => error_type::NO_BACKEND,
            DispatchError::Admission(AdmissionError::QueueFull) => error_type::QUEUE_FULL,
            DispatchError::Admission(AdmissionError::QueueTimeout) => error_type::QUEUE_TIMEOUT,
            DispatchError::Admission(AdmissionError::Cancelled) => error_type::CIRCUIT_BREAKER,
            DispatchError::Upstream(_) => error_type::AGENT_ERROR,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Invalid(_) => StatusCode::BAD_REQUEST,
            DispatchError::NoRoute { reject: true } => StatusCode::BAD_REQUEST,
            DispatchError::NoRoute { reject: false } => StatusCode::NOT_FOUND,
            DispatchError::NoAgent(_) => StatusCode::NOT_FOUND,
            DispatchError::NoBackend => StatusCode::NOT_FOUND,
            DispatchError::Admission(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short, class-labeled message; internal detail stays out of responses.
    pub fn message(&self) -> String {
        match self {
            DispatchError::Invalid(message) => message.clone(),
            DispatchError::NoRoute { reject: true } => "no route matched the request".to_string(),
            DispatchError::NoRoute { reject: false } => "no route found".to_string(),
            DispatchError::NoAgent(agent) => format!("no ready agent {agent:?}"),
            DispatchError::NoBackend => "no ready backend for the matched rule".to_string(),
            DispatchError::Admission(AdmissionError::QueueFull) => {
                "queue full: cannot accept more requests".to_string()
            }
            DispatchError::Admission(AdmissionError::QueueTimeout) => {
                "queue timeout: request waited too long for a slot".to_string()
            }
            DispatchError::Admission(AdmissionError::Cancelled) => "request cancelled".to_string(),
            DispatchError::Upstream(ForwardError::Timeout) => "agent request timed out".to_string(),
            DispatchError::Upstream(ForwardError::Cancelled) => "request cancelled".to_string(),
            DispatchError::Upstream(ForwardError::Upstream { status, body }) => {
                format!("agent error ({status}): {body}")
            }
            DispatchError::Upstream(ForwardError::Network(detail)) => {
                format!("agent unreachable: {detail}")
            }
        }
    }
}

pub struct DispatchSuccess {
    pub output: ForwardOutput,
    pub agent: String,
    pub rule: String,
    pub latency_ms: u64,
}

/// The dispatch core: match -> select -> admit -> forward. Shared by the
/// invoke API and MCP tools/call. `correlation_id` is the effective id sent
/// downstream; sticky selection keys off the client-supplied one only.
pub async fn dispatch(
    state: &GatewayState,
    request: &InvokeRequest,
    correlation_id: &str,
    headers: HashMap<String, String>,
    cancel: &CancellationToken,
) -> Result<DispatchSuccess, DispatchError> {
    if request.query.is_empty() {
        return Err(DispatchError::Invalid("query is required".to_string()));
    }

    let started = Instant::now();
    let agent = request.agent.as_deref().unwrap_or_default();
    let tenant_id = request.tenant_id.as_deref().unwrap_or_default();
    // Stickiness keys off client-supplied identity only; a generated
    // correlation id must not defeat weighted selection.
    let client_correlation = request.correlation_id.as_deref().unwrap_or_default();

    let table = state.table.snapshot().await;
    let matched = match match_request(
        &table,
        &MatchRequest {
            agent,
            intent: request.intent.as_deref().unwrap_or_default(),
            tenant_id,
            headers,
        },
    ) {
        MatchOutcome::Matched(matched) => matched,
        MatchOutcome::NoMatch { .. } if !agent.is_empty() => {
            return Err(DispatchError::NoAgent(agent.to_string()));
        }
        MatchOutcome::NoMatch { reject } => {
            return Err(DispatchError::NoRoute { reject });
        }
    };

    let backends: Vec<weft_types::CompiledBackend> =
        matched.backends.iter().map(|b| (*b).clone()).collect();
    let rule = matched.rule.to_string();
    let Some(backend) = select_backend(&backends, tenant_id, client_correlation) else {
        return Err(DispatchError::NoBackend);
    };

    let circuit = table.defaults.circuit_breaker();
    let pool = state.admission.pool(&rule, &circuit).await;
    let slot = pool.acquire(cancel).await.map_err(|e| {
        metrics::CIRCUIT_REJECTIONS
            .with_label_values(&[e.reason()])
            .inc();
        DispatchError::Admission(e)
    })?;

    let timeout = Duration::from_millis(state.request_timeout_ms().await);
    let mut downstream = request.clone();
    downstream.correlation_id = Some(correlation_id.to_string());
    let outcome = state
        .forwarder
        .forward(&backend.endpoint, &downstream, timeout, cancel)
        .await;
    // Slot release strictly follows forward completion on every path.
    drop(slot);

    let output = outcome.map_err(DispatchError::Upstream)?;
    Ok(DispatchSuccess {
        output,
        agent: backend.agent_name.clone(),
        rule,
        latency_ms: started.elapsed().as_millis() as u64,
    })
}

/// Error envelope wrapper carrying the correlation id.
pub struct ApiError {
    pub error: DispatchError,
    pub correlation_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(self.error.error_type());
        let body = ErrorResponse::new(self.error.message(), self.correlation_id);
        (self.error.status(), Json(body)).into_response()
    }
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// POST /v1/invoke
pub async fn invoke(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let correlation_id = request
        .correlation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let cancel = CancellationToken::new();

    let success = dispatch(&state, &request, &correlation_id, header_map(&headers), &cancel)
        .await
        .map_err(|error| {
            if !matches!(
                error,
                DispatchError::Upstream(ForwardError::Cancelled)
                    | DispatchError::Admission(AdmissionError::Cancelled)
            ) {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error_type = error.error_type(),
                    "dispatch rejected: {}",
                    error.message()
                );
            }
            ApiError {
                error,
                correlation_id: correlation_id.clone(),
            }
        })?;

    metrics::REQUESTS_TOTAL
        .with_label_values(&[success.rule.as_str(), success.agent.as_str(), "200"])
        .inc();
    metrics::REQUEST_DURATION
        .with_label_values(&[success.rule.as_str()])
        .observe(success.latency_ms as f64 / 1_000.0);
    tracing::info!(
        rule = %success.rule,
        agent = %success.agent,
        latency_ms = success.latency_ms,
        correlation_id = %correlation_id,
        "request dispatched"
    );

    Ok(Json(InvokeResponse {
        success: true,
        result: success.output.value,
        agent: success.agent,
        correlation_id,
        latency_ms: success.latency_ms.max(1),
    }))
}

#[derive(Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<String>,
}

/// GET /v1/agents: ready backends as `namespace/name`.
pub async fn list_agents(State(state): State<GatewayState>) -> Json<AgentsResponse> {
    let agents = state
        .agents
        .ready_agents()
        .await
        .into_iter()
        .map(|(key, _)| key.to_string())
        .collect();
    Json(AgentsResponse { agents })
}

#[derive(Serialize)]
pub struct RoutesResponse {
    pub routes: Vec<String>,
    pub count: usize,
    pub pools: Vec<PoolStatus>,
}

#[derive(Serialize)]
pub struct PoolStatus {
    pub rule: String,
    pub active: u32,
    pub waiting: u32,
}

/// GET /v1/routes: loaded rule names plus admission pool counters.
pub async fn list_routes(State(state): State<GatewayState>) -> Json<RoutesResponse> {
    let table = state.table.snapshot().await;
    let routes: Vec<String> = table.rules.iter().map(|r| r.rule.name.clone()).collect();
    let pools = state
        .admission
        .snapshots()
        .await
        .into_iter()
        .map(|(rule, active, waiting)| PoolStatus {
            rule,
            active,
            waiting,
        })
        .collect();
    Json(RoutesResponse {
        count: routes.len(),
        routes,
        pools,
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /healthz
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
