//! Tool executor - the single dispatch point for tool invocations

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::context::ExecutionContext;
use crate::agent::message::{ToolInvocation, ToolResult};
use crate::mcp::McpClientPool;

use super::{answer_spec, Tool, ToolSpec, ANSWER_TOOL, BROWSER_PREFIX};

/// Maps tool names to handlers. Names without a registered handler fall
/// through to the user's external workspace tools.
///
/// `execute` never fails: every error becomes a failed [`ToolResult`] that the
/// model gets to see.
#[derive(Default)]
pub struct ToolExecutor {
    handlers: HashMap<String, Arc<dyn Tool>>,
    mcp: Option<Arc<McpClientPool>>,
}

impl ToolExecutor {
    /// Create an executor with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.handlers.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Route unregistered names to the user's MCP tools
    pub fn with_mcp(mut self, pool: Arc<McpClientPool>) -> Self {
        self.mcp = Some(pool);
        self
    }

    /// Check if a handler is registered
    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Declarations of the built-in (non-browser) handlers plus `answer`
    pub fn builtin_specs(&self) -> Vec<ToolSpec> {
        self.specs_where(|name| !name.starts_with(BROWSER_PREFIX))
    }

    /// Declarations of the browser handlers plus `answer`
    pub fn browser_specs(&self) -> Vec<ToolSpec> {
        self.specs_where(|name| name.starts_with(BROWSER_PREFIX))
    }

    /// Declarations of every registered handler plus `answer`
    pub fn all_specs(&self) -> Vec<ToolSpec> {
        self.specs_where(|_| true)
    }

    fn specs_where(&self, keep: impl Fn(&str) -> bool) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .handlers
            .values()
            .filter(|t| keep(t.name()))
            .map(|t| t.to_spec())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs.insert(0, answer_spec());
        specs
    }

    /// The user's external workspace tools. Discovery failures leave the
    /// toolset without them rather than failing the request.
    pub async fn external_specs(&self, ctx: &ExecutionContext) -> Vec<ToolSpec> {
        let Some(pool) = &self.mcp else {
            return Vec::new();
        };

        match pool.list_tools(&ctx.user_id, ctx.credentials.as_ref()).await {
            Ok(tools) => tools
                .into_iter()
                .filter(|t| t.name != ANSWER_TOOL && !self.has(&t.name))
                .collect(),
            Err(e) => {
                warn!("External tools unavailable for {}: {}", ctx.user_id, e);
                Vec::new()
            }
        }
    }

    /// Execute one invocation
    pub async fn execute(&self, call: &ToolInvocation, ctx: &ExecutionContext) -> ToolResult {
        debug!("Executing tool: {} with args: {}", call.name, call.arguments);

        let result = self.dispatch(&call.name, call.arguments.clone(), ctx).await;
        debug!("Tool {} success: {}", call.name, result.success);
        result
    }

    async fn dispatch(&self, name: &str, arguments: Value, ctx: &ExecutionContext) -> ToolResult {
        if name == ANSWER_TOOL {
            return ToolResult::failure("The answer tool ends the loop and is not executed");
        }

        if let Some(tool) = self.handlers.get(name) {
            return match tool.execute(arguments, ctx).await {
                Ok(result) => result,
                Err(e) => ToolResult::failure(format!("Error: {}", e)),
            };
        }

        if name.starts_with(BROWSER_PREFIX) {
            return ToolResult::failure(format!("Unknown browser action: {}", name));
        }

        let Some(pool) = &self.mcp else {
            return ToolResult::failure(format!("Unknown tool: {}", name));
        };

        let credentials = ctx.credentials.as_ref();
        match pool.has_tool(&ctx.user_id, credentials, name).await {
            Ok(true) => {}
            Ok(false) => return ToolResult::failure(format!("Unknown tool: {}", name)),
            Err(e) => return ToolResult::failure(format!("Error: external tools unavailable: {}", e)),
        }

        match pool.call_tool(&ctx.user_id, credentials, name, arguments).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(format!("Error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryCredentials, InMemoryWorkspace};
    use crate::mcp::testing::FakeConnector;
    use crate::tools::{AddWorkspaceItemTool, DummyTool};
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolInvocation {
        ToolInvocation::new("call_0", name, args)
    }

    #[tokio::test]
    async fn test_executor_register_and_execute() {
        let mut executor = ToolExecutor::new();
        executor.register(DummyTool {
            name: "test_tool".to_string(),
            result: "success".to_string(),
        });

        assert!(executor.has("test_tool"));

        let ctx = ExecutionContext::test("u1", "q");
        let result = executor.execute(&call("test_tool", json!({})), &ctx).await;
        assert!(result.success);
        assert_eq!(result.output.to_text(), "success");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failure_result() {
        let executor = ToolExecutor::new();
        let ctx = ExecutionContext::test("u1", "q");

        let result = executor.execute(&call("unknown", json!({})), &ctx).await;
        assert!(!result.success);
        assert!(result.output.to_text().contains("Unknown tool"));

        let browser = executor.execute(&call("browser_scroll", json!({})), &ctx).await;
        assert!(!browser.success);
        assert!(browser.output.to_text().contains("Unknown browser action"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure() {
        let mut executor = ToolExecutor::new();
        executor.register(AddWorkspaceItemTool::new(Arc::new(InMemoryWorkspace::new())));
        let ctx = ExecutionContext::test("u1", "q");

        let result = executor.execute(&call("add_workspace_item", json!({})), &ctx).await;
        assert!(!result.success);
        assert!(result.output.to_text().contains("destination"));
    }

    #[tokio::test]
    async fn test_specs_always_start_with_answer() {
        let mut executor = ToolExecutor::new();
        executor.register(AddWorkspaceItemTool::new(Arc::new(InMemoryWorkspace::new())));

        let builtins = executor.builtin_specs();
        assert_eq!(builtins[0].name, ANSWER_TOOL);
        assert_eq!(builtins.len(), 2);

        let browser = executor.browser_specs();
        assert_eq!(browser.len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_names_route_to_mcp() {
        let pool = Arc::new(McpClientPool::new(Arc::new(FakeConnector::new())));
        let executor = ToolExecutor::new().with_mcp(pool.clone());
        let credentials = Arc::new(InMemoryCredentials::new().with_token("alice", "tok"));
        let ctx = ExecutionContext::new("alice", "find my roadmap", credentials);

        let specs = executor.external_specs(&ctx).await;
        assert_eq!(specs.len(), 2);

        let result = executor
            .execute(&call("search_pages", json!({"query": "roadmap"})), &ctx)
            .await;
        assert!(result.success);

        let unknown = executor.execute(&call("drop_database", json!({})), &ctx).await;
        assert!(!unknown.success);
        assert!(unknown.output.to_text().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_mcp_unavailable_is_failure_not_error() {
        let pool = Arc::new(McpClientPool::new(Arc::new(FakeConnector::new())));
        let executor = ToolExecutor::new().with_mcp(pool);
        // No token stored for this user
        let ctx = ExecutionContext::test("bob", "q");

        assert!(executor.external_specs(&ctx).await.is_empty());
        let result = executor.execute(&call("search_pages", json!({})), &ctx).await;
        assert!(!result.success);
    }
}
