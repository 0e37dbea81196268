//! Tool trait and registry: the agent's view of external capabilities.
//!
//! Tools are discovered from the tool-execution process at startup and
//! registered by name. The registry validates every invocation against the
//! tool's declared input schema before the tool itself runs, so malformed
//! input never crosses the process boundary.

use crate::error::ToolError;
use crate::schema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A discovered tool: name, description and input schema.
///
/// Descriptors are read-only for the process lifetime; there is no
/// hot-reload. The set is sent to the model verbatim so it knows what it
/// can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name, unique within a registry
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// A request to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Input as a JSON value
    pub input: serde_json::Value,
}

/// The core Tool trait.
///
/// Invocation may run arbitrary read/analysis operations against the
/// database behind the tool-execution process. The registry does not
/// enforce read-only access; that policy belongs to the tool server and
/// its configuration. Treat every registered tool as a trust boundary.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "sql_db_query").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Invoke the tool with already-validated input.
    async fn invoke(&self, input: serde_json::Value) -> std::result::Result<String, ToolError>;

    /// This tool's descriptor.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// The agent loop uses this to:
/// 1. Get the descriptor set to send to the model
/// 2. Look up, validate and invoke tools when the model requests them
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Descriptors of every registered tool (for sending to the model).
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// Validate and invoke a tool call.
    ///
    /// An unknown name or a schema mismatch fails here, locally, without
    /// the tool being contacted.
    pub async fn invoke(&self, call: &ToolCall) -> std::result::Result<String, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        schema::validate(&tool.input_schema(), &call.input).map_err(|reason| {
            ToolError::InvalidInput {
                tool: call.name.clone(),
                reason,
            }
        })?;

        tool.invoke(call.input.clone()).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A simple test tool that records how often it ran.
    struct EchoTool {
        invocations: Arc<AtomicUsize>,
    }

    impl EchoTool {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let invocations = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    invocations: invocations.clone(),
                },
                invocations,
            )
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn invoke(
            &self,
            input: serde_json::Value,
        ) -> std::result::Result<String, ToolError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(input["text"].as_str().unwrap_or("").to_string())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool::new().0));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_descriptors() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool::new().0));
        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "echo");
        assert!(descriptors[0].input_schema["required"].is_array());
    }

    #[tokio::test]
    async fn registry_invoke_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool::new().0));

        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            input: serde_json::json!({"text": "hello world"}),
        };
        let output = registry.invoke(&call).await.unwrap();
        assert_eq!(output, "hello world");
    }

    #[tokio::test]
    async fn registry_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            input: serde_json::json!({}),
        };
        let err = registry.invoke(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn schema_mismatch_fails_without_invoking() {
        let (tool, invocations) = EchoTool::new();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(tool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            input: serde_json::json!({"text": 42}),
        };
        let err = registry.invoke(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }
}
