// crates/weft-server/src/gateway/state.rs
// Shared gateway state

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::gateway::admission::AdmissionRegistry;
use crate::gateway::agents::AgentCache;
use crate::gateway::forward::Forwarder;
use crate::gateway::mcp::session::SessionRegistry;
use crate::gateway::table::RouteTable;

/// Shared application state for the dispatcher process.
#[derive(Clone)]
pub struct GatewayState {
    /// Current compiled route table snapshot holder.
    pub table: Arc<RouteTable>,

    /// Per-rule admission pools.
    pub admission: Arc<AdmissionRegistry>,

    /// Downstream HTTP forwarder (shared client).
    pub forwarder: Arc<Forwarder>,

    /// Live Agent view for MCP and /v1/agents.
    pub agents: Arc<AgentCache>,

    /// Streaming MCP sessions.
    pub sessions: Arc<SessionRegistry>,

    pub config: Arc<GatewayConfig>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, client: reqwest::Client) -> Self {
        let namespace = config.namespace.clone();
        Self {
            table: Arc::new(RouteTable::new()),
            admission: Arc::new(AdmissionRegistry::new()),
            forwarder: Arc::new(Forwarder::new(client)),
            agents: AgentCache::new(namespace),
            sessions: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
        }
    }

    /// Effective request timeout in milliseconds: the table defaults,
    /// overridden by the CLI flag, floored at one second.
    pub async fn request_timeout_ms(&self) -> u64 {
        let table = self.table.snapshot().await;
        let from_table = table.defaults.circuit_breaker().request_timeout_ms;
        match self.config.request_timeout {
            Some(seconds) => (seconds * 1_000).max(1_000),
            None => from_table,
        }
    }
}
