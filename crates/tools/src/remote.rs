//! Remote tool proxy: adapts a tool discovered from the tool-host to the
//! core `Tool` trait so the registry can treat it like any local tool.

use crate::client::{McpClient, McpError};
use async_trait::async_trait;
use sqlsage_core::{Tool, ToolDescriptor, ToolError};
use std::sync::Arc;

/// A tool that lives in the tool-host process.
///
/// Carries the descriptor captured at discovery time and forwards every
/// invocation over the shared client connection.
pub struct RemoteTool {
    descriptor: ToolDescriptor,
    client: Arc<McpClient>,
}

impl RemoteTool {
    pub fn new(descriptor: ToolDescriptor, client: Arc<McpClient>) -> Self {
        Self { descriptor, client }
    }

    /// The descriptor captured at discovery time.
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn classify(&self, err: McpError) -> ToolError {
        let tool = self.descriptor.name.clone();
        match err {
            McpError::Server(reason) => ToolError::ExecutionFailed { tool, reason },
            McpError::Timeout { secs } => ToolError::Timeout {
                tool,
                timeout_secs: secs,
            },
            other => ToolError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.descriptor.input_schema.clone()
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let output = self
            .client
            .call_tool(&self.descriptor.name, input)
            .await
            .map_err(|err| self.classify(err))?;
        // The model handles an explicit placeholder better than silence.
        if output.is_empty() {
            Ok("(no output)".to_string())
        } else {
            Ok(output)
        }
    }
}
