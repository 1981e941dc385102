// crates/weft-server/src/config.rs
// Gateway process configuration

use std::path::PathBuf;

use crate::error::{Result, WeftError};

/// Default location of the compiled routes blob mount.
pub const DEFAULT_ROUTES_FILE: &str = "/etc/gateway/routes.json";

pub const DEFAULT_GATEWAY_ADDR: &str = ":8080";
pub const DEFAULT_METRICS_ADDR: &str = ":9090";

/// Resolved gateway configuration: CLI flags first, environment second,
/// defaults last.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: String,
    pub metrics_addr: String,
    pub routes_file: PathBuf,
    /// Override for `defaults.requestTimeoutMs`, seconds. Floors at 1.
    pub request_timeout: Option<u64>,
    pub mcp_enabled: bool,
    /// Namespace the agent watcher is scoped to; None watches everything.
    pub namespace: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_GATEWAY_ADDR.to_string(),
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
            routes_file: PathBuf::from(DEFAULT_ROUTES_FILE),
            request_timeout: None,
            mcp_enabled: false,
            namespace: None,
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl GatewayConfig {
    /// Environment-backed defaults (`GATEWAY_ADDR`, `METRICS_ADDR`,
    /// `ROUTES_FILE`, `ENABLE_MCP`, `WATCH_NAMESPACE`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = env_nonempty("GATEWAY_ADDR") {
            config.addr = addr;
        }
        if let Some(addr) = env_nonempty("METRICS_ADDR") {
            config.metrics_addr = addr;
        }
        if let Some(path) = env_nonempty("ROUTES_FILE") {
            config.routes_file = PathBuf::from(path);
        }
        if let Some(enabled) = env_nonempty("ENABLE_MCP") {
            config.mcp_enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
        config.namespace = env_nonempty("WATCH_NAMESPACE");
        config
    }

    /// Normalize a `:port` or `host:port` bind address for the listener.
    pub fn bind_addr(addr: &str) -> Result<String> {
        if addr.is_empty() {
            return Err(WeftError::Config("empty bind address".to_string()));
        }
        let normalized = if let Some(port) = addr.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else {
            addr.to_string()
        };
        let port = normalized
            .rsplit_once(':')
            .map(|(_, port)| port)
            .unwrap_or_default();
        if port.is_empty() || port.parse::<u16>().is_err() {
            return Err(WeftError::Config(format!("invalid bind address {addr:?}")));
        }
        Ok(normalized)
    }
}
