//! # SqlSage Tools
//!
//! Tool-host process management and remote tool proxies.
//!
//! The tool-host is an external child process (by default a Python SQL
//! tool server) that speaks JSON-RPC 2.0 over stdio. At startup SqlSage
//! spawns it, asks for its tool listing, and wraps each advertised tool
//! as a [`RemoteTool`] in a [`ToolRegistry`]. From then on the agent loop
//! cannot tell a remote tool from a local one.

pub mod client;
pub mod protocol;
pub mod remote;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{McpClient, McpError};
pub use remote::RemoteTool;

use sqlsage_core::ToolRegistry;
use std::sync::Arc;
use tracing::info;

/// Discover the tool-host's tools and build a registry of proxies for them.
pub async fn discover_registry(client: &Arc<McpClient>) -> Result<ToolRegistry, McpError> {
    let descriptors = client.list_tools().await?;
    let mut registry = ToolRegistry::new();
    for descriptor in descriptors {
        registry.register(Box::new(RemoteTool::new(descriptor, Arc::clone(client))));
    }
    info!(tools = registry.len(), "Registered tool-host tools");
    Ok(registry)
}
