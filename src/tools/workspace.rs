//! Workspace tool - simple writes into the user's workspace

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::context::ExecutionContext;
use crate::agent::message::ToolResult;
use crate::collaborators::WorkspaceWriter;
use crate::Result;

use super::{required_str, Tool};

/// Add a short item (note, task, idea) to a named list in the workspace
pub struct AddWorkspaceItemTool {
    writer: Arc<dyn WorkspaceWriter>,
}

impl AddWorkspaceItemTool {
    pub fn new(writer: Arc<dyn WorkspaceWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Tool for AddWorkspaceItemTool {
    fn name(&self) -> &str { "add_workspace_item" }
    fn description(&self) -> &str { "Add a short item (note, task, idea) to a list in the user's workspace" }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "destination": {
                    "type": "string",
                    "description": "List to add to, e.g. 'tasks' or 'ideas'"
                },
                "text": {
                    "type": "string",
                    "description": "The item to add"
                }
            },
            "required": ["destination", "text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let destination = required_str(&params, "destination")?;
        let text = required_str(&params, "text")?;

        self.writer.write(&ctx.user_id, destination, text).await?;
        Ok(ToolResult::ok(format!("Added to {}: {}", destination, text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryWorkspace;

    #[tokio::test]
    async fn test_add_item_writes_for_user() {
        let workspace = Arc::new(InMemoryWorkspace::new());
        let tool = AddWorkspaceItemTool::new(workspace.clone());
        let ctx = ExecutionContext::test("alice", "remember to buy milk");

        let result = tool
            .execute(json!({"destination": "tasks", "text": "buy milk"}), &ctx)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            workspace.entries(),
            vec![("alice".to_string(), "tasks".to_string(), "buy milk".to_string())]
        );
    }

    #[tokio::test]
    async fn test_missing_text_is_error() {
        let tool = AddWorkspaceItemTool::new(Arc::new(InMemoryWorkspace::new()));
        let ctx = ExecutionContext::test("alice", "q");
        assert!(tool.execute(json!({"destination": "tasks"}), &ctx).await.is_err());
    }
}
