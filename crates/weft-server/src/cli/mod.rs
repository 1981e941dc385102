// crates/weft-server/src/cli/mod.rs
// CLI surface for the weft binary

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod dev;
pub mod gateway;
pub mod operator;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Declarative control plane and request gateway for AI agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconciliation engine
    Operator(OperatorArgs),

    /// Run the request dispatcher
    Gateway(GatewayArgs),

    /// Run operator and gateway in one process against an in-memory store
    Dev(DevArgs),
}

#[derive(Args)]
pub struct OperatorArgs {
    /// Directory of resource JSON files loaded into the store at startup
    #[arg(long)]
    pub seed: Option<PathBuf>,

    /// Mirror the compiled route blob to this file for the gateway
    #[arg(long, env = "ROUTES_FILE")]
    pub routes_file: Option<PathBuf>,

    /// Restrict watches to one namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,
}

#[derive(Args)]
pub struct GatewayArgs {
    /// Listen address for the client API
    #[arg(long, default_value = ":8080", env = "GATEWAY_ADDR")]
    pub addr: String,

    /// Listen address for /metrics
    #[arg(long, default_value = ":9090", env = "METRICS_ADDR")]
    pub metrics_addr: String,

    /// Compiled route table file
    #[arg(long, env = "ROUTES_FILE")]
    pub routes_file: Option<PathBuf>,

    /// Downstream request timeout in seconds (overrides table defaults)
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Enable the MCP endpoints
    #[arg(long, env = "ENABLE_MCP")]
    pub mcp_enabled: bool,

    /// Namespace the MCP agent watcher is scoped to
    #[arg(long = "mcp-namespace", env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,
}

#[derive(Args)]
pub struct DevArgs {
    /// Directory of resource JSON files loaded into the store at startup
    #[arg(long)]
    pub seed: Option<PathBuf>,

    #[command(flatten)]
    pub gateway: GatewayArgs,
}
