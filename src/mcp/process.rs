//! MCP connections to a tool server spawned as a child process.
//!
//! One process per user, started with the user's workspace token in its
//! environment and spoken to over stdio.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, Tool as McpTool},
    service::{Peer, RoleClient, RunningService, ServiceExt},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::agent::message::ToolResult;
use crate::collaborators::CredentialStore;
use crate::config::McpConfig;
use crate::error::Error;
use crate::tools::ToolSpec;
use crate::Result;

use super::{McpConnection, McpConnector};

/// Spawns the configured MCP server for each user.
pub struct ChildProcessConnector {
    command: String,
    args: Vec<String>,
    token_env: String,
}

impl ChildProcessConnector {
    pub fn new(command: &str, args: Vec<String>, token_env: &str) -> Self {
        Self {
            command: command.to_string(),
            args,
            token_env: token_env.to_string(),
        }
    }

    pub fn from_config(config: &McpConfig) -> Self {
        Self::new(&config.command, config.args.clone(), &config.token_env)
    }
}

#[async_trait]
impl McpConnector for ChildProcessConnector {
    async fn connect(&self, user_id: &str, credentials: &dyn CredentialStore) -> Result<Arc<dyn McpConnection>> {
        let token = credentials
            .workspace_token(user_id)
            .await?
            .ok_or_else(|| Error::Mcp(format!("No external workspace token stored for {}", user_id)))?;

        let transport = TokioChildProcess::new(Command::new(&self.command).configure(|cmd| {
            cmd.args(&self.args);
            cmd.env(&self.token_env, &token);
        }))
        .map_err(|e| Error::Mcp(format!("Failed to spawn {}: {}", self.command, e)))?;

        let service = ()
            .serve(transport)
            .await
            .map_err(|e| Error::Mcp(format!("Handshake with {} failed: {}", self.command, e)))?;

        info!("Started MCP server {} for {}", self.command, user_id);
        Ok(Arc::new(ChildProcessConnection {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }))
    }
}

/// A running MCP client session.
struct ChildProcessConnection {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

#[async_trait]
impl McpConnection for ChildProcessConnection {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let listed = self
            .peer
            .list_tools(Default::default())
            .await
            .map_err(|e| Error::Mcp(format!("list_tools failed: {}", e)))?;

        debug!("MCP server advertised {} tools", listed.tools.len());
        Ok(listed.tools.iter().map(spec_from_tool).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(Error::Mcp(format!(
                    "Arguments for {} must be an object, got {}",
                    name, other
                )))
            }
        };

        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| Error::Mcp(format!("{} failed: {}", name, e)))?;

        Ok(tool_result_from(&result))
    }

    async fn close(&self) -> Result<()> {
        if let Some(service) = self.service.lock().await.take() {
            service
                .cancel()
                .await
                .map_err(|e| Error::Mcp(format!("Failed to stop MCP server: {}", e)))?;
        }
        Ok(())
    }
}

fn spec_from_tool(tool: &McpTool) -> ToolSpec {
    ToolSpec {
        name: tool.name.to_string(),
        description: tool.description.as_deref().unwrap_or_default().to_string(),
        parameters: Value::Object(tool.input_schema.as_ref().clone()),
    }
}

/// Prefer structured content; otherwise join the text parts.
fn tool_result_from(result: &CallToolResult) -> ToolResult {
    let failed = result.is_error.unwrap_or(false);

    if let Some(structured) = result.structured_content.clone() {
        return if failed {
            ToolResult::failure_structured(structured)
        } else {
            ToolResult::ok_structured(structured)
        };
    }

    let text = result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect::<Vec<_>>()
        .join("\n");

    if failed {
        ToolResult::failure(text)
    } else {
        ToolResult::ok(text)
    }
}
