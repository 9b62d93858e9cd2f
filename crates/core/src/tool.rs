//! Tool trait and registry: the abstraction over assistant capabilities.
//!
//! Concrete tools (calendar, notes, messaging, search) live outside this
//! workspace. The registry is how the loop reaches them by name.

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use std::collections::HashMap;

/// Reserved argument key under which the caller's identity travels to the
/// registry. It is stripped before the tool sees its arguments.
pub const CALLER_ID_KEY: &str = "_caller_id";

/// Identity plumbing handed to a tool alongside its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub caller_id: Option<String>,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calendar", "notes").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
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

    /// Get all tool definitions, sorted by name for stable prompts.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run a tool by name. The reserved caller key is moved out of the
    /// arguments into the tool context.
    pub async fn run_tool(
        &self,
        name: &str,
        mut args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let caller_id = args
            .as_object_mut()
            .and_then(|obj| obj.remove(CALLER_ID_KEY))
            .and_then(|v| v.as_str().map(str::to_string));

        tool.execute(args, &ToolContext { caller_id }).await
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
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

    /// Echoes its arguments and the caller it was invoked for.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            ctx: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({
                "args": arguments,
                "caller": ctx.caller_id,
            }))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.definitions()[0].name, "echo");
    }

    #[test]
    fn names_lists_registered_tools() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
        registry.register(Box::new(EchoTool));
        assert!(!registry.is_empty());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn run_tool_strips_caller_id() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let out = registry
            .run_tool("echo", serde_json::json!({"text": "hi", "_caller_id": "user-7"}))
            .await
            .unwrap();
        assert_eq!(out["caller"], "user-7");
        assert_eq!(out["args"], serde_json::json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn run_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry.run_tool("nonexistent", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
