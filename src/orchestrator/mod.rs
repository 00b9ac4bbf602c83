//! Orchestrator - classify, route, run the agent loop, fall back.
//!
//! ```text
//! request -> retrieve context -> classify -> backend for category
//!         -> agent loop (toolset for category)
//!         -> on backend failure: one retry on the fast fallback, answer tool only
//! ```

mod classifier;
mod routing;

pub use classifier::{OverrideRule, Route, TaskClassifier};
pub use routing::{BackendConfig, Provider, RoutingTable, TaskCategory, Tier};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::llm::{BackendRegistry, Usage};
use crate::agent::message::ChatTurn;
use crate::agent::{AgentLoop, ExecutionContext, LoopOutcome, Termination};
use crate::browser::{BrowserSessionManager, FileSessionIndex, HttpBrowserService};
use crate::collaborators::{
    ContextRetriever, CredentialStore, FileCredentialStore, FileWorkspaceWriter, HttpContextRetriever,
    NoRetrieval, WorkspaceWriter,
};
use crate::config::Config;
use crate::error::Error;
use crate::mcp::{ChildProcessConnector, McpClientPool};
use crate::tools::{answer_spec, AddWorkspaceItemTool, BrowserTool, ToolExecutor, ToolSpec};
use crate::Result;

/// Outcome of one request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub request_id: String,
    pub answer: String,
    /// Identifier of the backend that produced the answer.
    pub backend: String,
    pub category: TaskCategory,
    pub elapsed: Duration,
    pub steps: usize,
    pub tool_calls: usize,
    pub usage: Usage,
    pub termination: Termination,
    pub fallback_used: bool,
    pub escalated: bool,
}

/// Composes classifier, backends, tools and collaborators.
pub struct Orchestrator {
    routing: RoutingTable,
    backends: BackendRegistry,
    classifier: TaskClassifier,
    credentials: Arc<dyn CredentialStore>,
    retriever: Arc<dyn ContextRetriever>,
    executor: ToolExecutor,
    /// No handlers: the fallback may only answer.
    fallback_executor: ToolExecutor,
    browser: Option<Arc<BrowserSessionManager>>,
    mcp: Option<Arc<McpClientPool>>,
    agent: AgentLoop,
    history_window: usize,
}

impl Orchestrator {
    pub fn new(
        routing: RoutingTable,
        backends: BackendRegistry,
        classifier: TaskClassifier,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            routing,
            backends,
            classifier,
            credentials,
            retriever: Arc::new(NoRetrieval),
            executor: ToolExecutor::new(),
            fallback_executor: ToolExecutor::new(),
            browser: None,
            mcp: None,
            agent: AgentLoop::new(5),
            history_window: crate::agent::context::DEFAULT_HISTORY_WINDOW,
        }
    }

    /// Build every collaborator from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backends = BackendRegistry::from_config(config)?;
        let classifier_backend = backends.get(&config.routing.classifier).ok();
        let classifier = TaskClassifier::new(classifier_backend, &config.workspace_keyword, config.routing.clone())?;
        let credentials = Arc::new(FileCredentialStore::new(&FileCredentialStore::default_path()));
        let retry = config.retry.policy();

        let mut orchestrator = Self::new(config.routing.clone(), backends, classifier, credentials)
            .with_workspace(Arc::new(FileWorkspaceWriter::new(&config.workspace)))
            .with_max_steps(config.max_steps)
            .with_history_window(config.history_window);

        if let Some(url) = &config.retrieval.url {
            orchestrator = orchestrator.with_retriever(Arc::new(HttpContextRetriever::new(url, retry.clone())));
        }

        if !config.browser.service_url.is_empty() {
            let manager = BrowserSessionManager::new(
                Arc::new(HttpBrowserService::new(&config.browser.service_url, retry)),
                Arc::new(FileSessionIndex::new(&config.browser.session_index)),
                config.browser.max_links,
            );
            orchestrator = orchestrator.with_browser(Arc::new(manager));
        }

        if config.mcp.enabled {
            let connector = ChildProcessConnector::from_config(&config.mcp);
            orchestrator = orchestrator.with_mcp(Arc::new(McpClientPool::new(Arc::new(connector))));
        }

        Ok(orchestrator)
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    /// Register the built-in workspace tool.
    pub fn with_workspace(mut self, writer: Arc<dyn WorkspaceWriter>) -> Self {
        self.executor.register(AddWorkspaceItemTool::new(writer));
        self
    }

    /// Register the browser tools on top of `manager`.
    pub fn with_browser(mut self, manager: Arc<BrowserSessionManager>) -> Self {
        for tool in BrowserTool::all(manager.clone()) {
            self.executor.register(tool);
        }
        self.browser = Some(manager);
        self
    }

    /// Route unregistered tool names to the user's external workspace.
    pub fn with_mcp(mut self, pool: Arc<McpClientPool>) -> Self {
        self.executor = std::mem::take(&mut self.executor).with_mcp(pool.clone());
        self.mcp = Some(pool);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.agent = AgentLoop::new(max_steps);
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    /// Handle one request end to end.
    pub async fn handle(&self, user_id: &str, query: &str, history: Vec<ChatTurn>) -> Result<ExecutionResult> {
        let ctx = self.context(user_id, query, history).await;
        let route = self.route(&ctx).await;
        self.execute(&ctx, &route).await
    }

    /// Build the request's context, including retrieved context.
    pub async fn context(&self, user_id: &str, query: &str, history: Vec<ChatTurn>) -> ExecutionContext {
        let retrieved = match self.retriever.retrieve(user_id, query).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Context retrieval failed for {}: {}", user_id, e);
                String::new()
            }
        };

        ExecutionContext::new(user_id, query, self.credentials.clone())
            .with_history(history)
            .with_retrieved_context(retrieved)
            .with_history_window(self.history_window)
    }

    pub async fn route(&self, ctx: &ExecutionContext) -> Route {
        self.classifier.route(&ctx.query, ctx.has_retrieved_context()).await
    }

    /// Run a routed request, falling back once if a capable backend fails.
    pub async fn execute(&self, ctx: &ExecutionContext, route: &Route) -> Result<ExecutionResult> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let primary = &route.backend;
        info!("[{}] {} request for {} on {}", request_id, route.category, ctx.user_id, primary.id());

        let tools = self.toolset(route, ctx).await;
        let primary_error = match self.run_on(primary, ctx, &tools, &self.executor).await {
            Ok(outcome) => {
                let result = self.finish(request_id, route, primary, outcome, started, false);
                return Ok(result);
            }
            Err(e) => e,
        };

        if primary.is_fast() {
            warn!("[{}] Fast backend {} failed: {}", request_id, primary.id(), primary_error);
            return Err(primary_error);
        }

        let fallback = &self.routing.fallback;
        warn!(
            "[{}] Backend {} failed ({}), falling back to {}",
            request_id,
            primary.id(),
            primary_error,
            fallback.id()
        );

        match self.run_on(fallback, ctx, &[answer_spec()], &self.fallback_executor).await {
            Ok(outcome) => Ok(self.finish(request_id, route, fallback, outcome, started, true)),
            Err(e) => {
                warn!("[{}] Fallback {} failed too: {}", request_id, fallback.id(), e);
                Err(Error::BackendsExhausted {
                    primary: primary.id(),
                    fallback: fallback.id(),
                })
            }
        }
    }

    async fn run_on(
        &self,
        backend: &BackendConfig,
        ctx: &ExecutionContext,
        tools: &[ToolSpec],
        executor: &ToolExecutor,
    ) -> Result<LoopOutcome> {
        let backend = self.backends.get(backend)?;
        self.agent.run(backend.as_ref(), ctx, tools, executor).await
    }

    /// Tools offered for a route. Escalated requests keep the built-ins and
    /// gain the external workspace tools.
    async fn toolset(&self, route: &Route, ctx: &ExecutionContext) -> Vec<ToolSpec> {
        if route.escalated {
            let mut tools = self.executor.builtin_specs();
            tools.extend(self.executor.external_specs(ctx).await);
            return tools;
        }

        match route.category {
            TaskCategory::Simple | TaskCategory::Retrieval => self.executor.builtin_specs(),
            TaskCategory::Browser => self.executor.browser_specs(),
            TaskCategory::ExternalWorkspace => {
                let mut tools = vec![answer_spec()];
                tools.extend(self.executor.external_specs(ctx).await);
                tools
            }
            TaskCategory::Complex => {
                let mut tools = self.executor.all_specs();
                tools.extend(self.executor.external_specs(ctx).await);
                tools
            }
        }
    }

    fn finish(
        &self,
        request_id: String,
        route: &Route,
        backend: &BackendConfig,
        outcome: LoopOutcome,
        started: Instant,
        fallback_used: bool,
    ) -> ExecutionResult {
        let result = ExecutionResult {
            request_id,
            answer: outcome.text,
            backend: backend.id(),
            category: route.category,
            elapsed: started.elapsed(),
            steps: outcome.steps,
            tool_calls: outcome.tool_calls,
            usage: outcome.usage,
            termination: outcome.termination,
            fallback_used,
            escalated: route.escalated,
        };

        info!(
            "[{}] Done: category={} backend={} steps={} tools={} tokens={} elapsed={:?} fallback={}",
            result.request_id,
            result.category,
            result.backend,
            result.steps,
            result.tool_calls,
            result.usage.total_tokens,
            result.elapsed,
            result.fallback_used
        );
        result
    }

    /// Close every MCP connection and destroy every browser session.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.mcp {
            pool.close_all().await;
        }
        if let Some(browser) = &self.browser {
            browser.shutdown().await;
        }
        info!("Orchestrator shut down");
    }
}
