//! Tools module - agent capabilities
//!
//! Tools are the actions a backend may invoke during the agent loop: the
//! answer terminator, simple workspace writes, browser actions and any tool
//! discovered from the user's external workspace.

mod browser;
mod runner;
mod workspace;

pub use browser::BrowserTool;
pub use runner::ToolExecutor;
pub use workspace::AddWorkspaceItemTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::context::ExecutionContext;
use crate::agent::message::ToolResult;
use crate::Result;

/// Name of the tool that ends the loop with its `text` argument.
pub const ANSWER_TOOL: &str = "answer";

/// Every browser tool name starts with this prefix.
pub const BROWSER_PREFIX: &str = "browser_";

/// Canonical tool declaration, rendered per provider by the adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments
    pub parameters: Value,
}

/// Declaration of the answer terminator.
pub fn answer_spec() -> ToolSpec {
    ToolSpec {
        name: ANSWER_TOOL.to_string(),
        description: "Finish the request and reply to the user with the final answer.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The complete reply shown to the user"
                }
            },
            "required": ["text"]
        }),
    }
}

/// Tool trait - interface for every registered handler
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool for the request described by `ctx`
    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult>;

    /// Convert to the canonical declaration
    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// String parameter by key, or a tool error naming it.
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::error::Error::Tool(format!("Missing '{}' parameter", key)))
}

/// Fixed-output tool for testing
#[cfg(test)]
pub struct DummyTool {
    pub name: String,
    pub result: String,
}

#[cfg(test)]
#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str { &self.name }
    fn description(&self) -> &str { "Dummy tool for testing" }
    fn parameters(&self) -> Value { json!({"type": "object", "properties": {}}) }

    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        Ok(ToolResult::ok(self.result.clone()))
    }
}
