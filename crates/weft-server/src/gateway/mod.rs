// crates/weft-server/src/gateway/mod.rs
// Dispatcher process: HTTP surface, route table, admission, MCP

pub mod admission;
pub mod agents;
pub mod api;
pub mod forward;
pub mod matcher;
pub mod mcp;
pub mod metrics;
pub mod selector;
pub mod state;
pub mod table;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use mcp::{codes, JsonRpcRequest, JsonRpcResponse};
use state::GatewayState;

/// Interval between keep-alive pings on streaming sessions.
const SSE_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Create the dispatcher router.
pub fn create_router(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/v1/invoke", post(api::invoke))
        .route("/v1/agents", get(api::list_agents))
        .route("/v1/routes", get(api::list_routes));

    if state.config.mcp_enabled {
        router = router
            .route("/mcp", post(mcp_post))
            .route("/mcp/sse", get(mcp_sse))
            .route("/mcp/message", post(mcp_message));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create the metrics router served on the metrics address.
pub fn create_metrics_router() -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/metrics", get(|| async { metrics::gather() }))
}

/// Forward agent-readiness changes to streaming sessions as
/// `notifications/tools/list_changed`.
pub fn spawn_tools_changed_forwarder(
    state: GatewayState,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let mut changes = state.agents.subscribe_changes();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        state.sessions.broadcast_tools_changed().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// POST /mcp: one request, one response.
async fn mcp_post(
    State(state): State<GatewayState>,
    body: String,
) -> axum::response::Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = JsonRpcResponse::failure(
                serde_json::Value::Null,
                codes::PARSE_ERROR,
                format!("parse error: {e}"),
            );
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    match mcp::service::handle(&state, request, None).await {
        Some(response) => Json(response).into_response(),
        // Notifications get no body
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// GET /mcp/sse: open a streaming session. The first event names the
/// session's POST endpoint; responses and notifications follow as `message`
/// events with a `ping` every 30 seconds.
async fn mcp_sse(
    State(state): State<GatewayState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session, mut rx) = state.sessions.create().await;
    let endpoint = format!("/mcp/message?sessionId={}", session.id);
    tracing::debug!(session = %session.id, "mcp session opened");

    let sessions = state.sessions.clone();
    let session_id = session.id.clone();
    let stream = async_stream::stream! {
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));

        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + SSE_PING_INTERVAL,
            SSE_PING_INTERVAL,
        );
        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(outbound) => {
                        yield Ok(Event::default().event(outbound.event).data(outbound.data));
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    yield Ok(Event::default().event("ping").data("{}"));
                }
            }
        }
        sessions.remove(&session_id).await;
    };

    Sse::new(stream)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionQuery {
    session_id: String,
}

/// POST /mcp/message?sessionId=<id>: accepted immediately; the JSON-RPC
/// response arrives on the session's event stream.
async fn mcp_message(
    State(state): State<GatewayState>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> axum::response::Response {
    let Some(session) = state.sessions.get(&query.session_id).await else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = JsonRpcResponse::failure(
                serde_json::Value::Null,
                codes::PARSE_ERROR,
                format!("parse error: {e}"),
            );
            let payload = serde_json::to_string(&response).unwrap_or_default();
            let _ = session.send("message", payload).await;
            return StatusCode::ACCEPTED.into_response();
        }
    };

    let state = state.clone();
    tokio::spawn(async move {
        if let Some(response) = mcp::service::handle(&state, request, Some(&session)).await {
            let payload = serde_json::to_string(&response).unwrap_or_default();
            if !session.send("message", payload).await {
                state.sessions.remove(&session.id).await;
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}
