//! Tool subsystem: trait, registry, and the core filesystem/shell tools,
//! ported from `attractor_agent.tools.{registry,core}`. The teacher crate
//! has no tool-calling subsystem at all (its `tools/` directory is a CLI
//! command module, not an agent tool registry), so the trait shape here
//! is grounded on original_source's registry contract instead, expressed
//! in the teacher's `async_trait` + `thiserror` idiom.

pub mod core;
pub mod patch;
pub mod truncation;

use crate::model::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("{0}")]
    ExecutionFailed(String),
}

/// A single tool invocation's outcome, pre-truncation. The registry
/// truncates and wraps this into a `ToolResult` content string.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    pub fn into_string(self) -> String {
        match self {
            ToolOutput::Text(s) => s,
            ToolOutput::Json(v) => v.to_string(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

/// name -> (definition, executor). Registration order doesn't matter;
/// the last `register()` call for a given name wins.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

pub struct ExecuteOutcome {
    /// Truncated form; what gets stored into session history.
    pub content: String,
    /// Complete, untruncated output; what a `tool_call_end` event carries.
    pub raw_content: String,
    pub is_error: bool,
    pub was_truncated: bool,
    pub original_chars: usize,
    pub original_lines: usize,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        self.tools.insert(name, tool);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Executes `name` with `args`, truncating the result per-tool and
    /// converting any execution failure into an error result prefixed
    /// `"Tool error: "` rather than propagating it. Unknown tool names
    /// also produce an error result instead of an `Err`.
    pub async fn execute(&self, name: &str, args: Value) -> ExecuteOutcome {
        let raw = match self.tools.get(name) {
            None => Err(ToolError::Unknown(name.to_string())),
            Some(tool) => tool.execute(args).await,
        };

        let (content, is_error) = match raw {
            Ok(output) => (output.into_string(), false),
            Err(e) => (format!("Tool error: {}", e), true),
        };

        let truncated = truncation::truncate(&content, name);
        ExecuteOutcome {
            content: truncated.text,
            raw_content: content,
            is_error,
            was_truncated: truncated.was_truncated,
            original_chars: truncated.original_chars,
            original_lines: truncated.original_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes its input".into(),
                parameters: serde_json::json!({}),
            }
        }

        async fn execute(&self, args: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Text(args.to_string()))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition { name: "fail".into(), description: "always fails".into(), parameters: serde_json::json!({}) }
        }

        async fn execute(&self, _args: Value) -> Result<ToolOutput, ToolError> {
            Err(ToolError::ExecutionFailed("boom".into()))
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result_not_a_panic() {
        let registry = ToolRegistry::new();
        let outcome = registry.execute("nonexistent", serde_json::json!({})).await;
        assert!(outcome.is_error);
        assert!(outcome.content.starts_with("Tool error: "));
    }

    #[tokio::test]
    async fn failing_tool_produces_prefixed_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let outcome = registry.execute("fail", serde_json::json!({})).await;
        assert!(outcome.is_error);
        assert!(outcome.content.starts_with("Tool error: "));
        assert!(outcome.content.contains("boom"));
    }

    #[tokio::test]
    async fn last_registration_wins_on_name_collision() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));
        // same registry, different name; now register a second "echo"-named
        // tool to confirm the collision rule, not just that two distinct
        // tools coexist.
        struct Echo2;
        #[async_trait]
        impl Tool for Echo2 {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition { name: "echo".into(), description: "v2".into(), parameters: serde_json::json!({}) }
            }
            async fn execute(&self, _args: Value) -> Result<ToolOutput, ToolError> {
                Ok(ToolOutput::Text("v2".into()))
            }
        }
        registry.register(Arc::new(Echo2));
        assert_eq!(registry.definitions().iter().filter(|d| d.name == "echo").count(), 1);
        let outcome = registry.execute("echo", serde_json::json!({})).await;
        assert_eq!(outcome.content, "v2");
    }
}
