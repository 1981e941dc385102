// crates/weft-server/src/lib.rs

//! Weft: a declarative control plane and request gateway for AI agents.
//!
//! The operator half converges Agent, Tool, Route, and Task resources into
//! worker deployments, compiled route tables, and orchestration Jobs. The
//! gateway half dispatches `invoke` and MCP calls to ready workers with
//! per-route admission control.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod reconcile;
pub mod render;
pub mod store;

pub use error::{Result, WeftError};
