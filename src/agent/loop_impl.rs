//! Agent loop - the provider-agnostic tool-calling state machine
//!
//! ```text
//! Sent -> (text only)        -> Terminated(Text)
//!      -> (answer call)      -> Terminated(Answer)
//!      -> (other tool calls) -> AwaitingToolResult -> Sent
//! ```
//!
//! The loop only talks to [`ModelBackend`] and its [`ProviderAdapter`], so the
//! same code drives Gemini function calling and Claude tool use.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::tools::{ToolExecutor, ToolSpec, ANSWER_TOOL};
use crate::Result;

use super::context::ExecutionContext;
use super::llm::{ModelBackend, Usage};
use super::message::ToolInvocation;

/// Returned when the step budget runs out before any text was produced.
pub const NO_FINAL_TEXT: &str = "Action completed, but no final text was produced.";

/// How a loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The backend called the answer tool.
    Answer,
    /// The backend replied with text and no tool calls.
    Text,
    /// The step budget ran out.
    StepBudget,
}

/// Final state of one loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub text: String,
    pub termination: Termination,
    /// Backend calls made.
    pub steps: usize,
    /// Tool invocations executed.
    pub tool_calls: usize,
    pub usage: Usage,
}

/// The agent loop with a hard ceiling on backend calls
pub struct AgentLoop {
    max_steps: usize,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run the loop for one request.
    ///
    /// Backend errors propagate; tool errors never do.
    pub async fn run(
        &self,
        backend: &dyn ModelBackend,
        ctx: &ExecutionContext,
        tools: &[ToolSpec],
        executor: &ToolExecutor,
    ) -> Result<LoopOutcome> {
        let adapter = backend.adapter();
        let tool_names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        let system = ctx.system_prompt(ANSWER_TOOL, &tool_names);
        let rendered_tools = adapter.render_tools(tools);
        let mut messages: Vec<Value> = adapter.render_history(ctx.windowed_history(), &ctx.seed_message());

        info!(
            "Starting agent loop on {} with {} tools",
            backend.id(),
            tools.len()
        );

        let mut usage = Usage::default();
        let mut tool_calls = 0;
        let mut last_text: Option<String> = None;

        for step in 1..=self.max_steps {
            debug!("Step {}/{}", step, self.max_steps);

            let raw = backend.send(&system, &messages, &rendered_tools).await?;
            let turn = adapter.parse_response(&raw)?;
            usage.add(&turn.usage);

            if let Some(text) = &turn.text {
                last_text = Some(text.clone());
            }

            // The answer tool wins over anything else in the same turn
            if let Some(answer) = turn.invocations.iter().find(|c| c.name == ANSWER_TOOL) {
                let text = answer_text(answer, turn.text.as_deref());
                info!("Agent answered after {} steps", step);
                return Ok(LoopOutcome {
                    text,
                    termination: Termination::Answer,
                    steps: step,
                    tool_calls,
                    usage,
                });
            }

            if !turn.has_invocations() {
                let text = turn.text.unwrap_or_default();
                info!("Agent completed with response: {} chars", text.len());
                return Ok(LoopOutcome {
                    text,
                    termination: Termination::Text,
                    steps: step,
                    tool_calls,
                    usage,
                });
            }

            messages.push(turn.native.clone());

            let mut results = Vec::with_capacity(turn.invocations.len());
            for call in &turn.invocations {
                let result = executor.execute(call, ctx).await;
                results.push((call.clone(), result));
            }
            tool_calls += results.len();

            messages.push(adapter.render_tool_result(&results));
        }

        info!("Step budget of {} exhausted", self.max_steps);
        Ok(LoopOutcome {
            text: last_text.unwrap_or_else(|| NO_FINAL_TEXT.to_string()),
            termination: Termination::StepBudget,
            steps: self.max_steps,
            tool_calls,
            usage,
        })
    }
}

fn answer_text(call: &ToolInvocation, fallback: Option<&str>) -> String {
    match call.str_arg("text") {
        Some(text) => text.to_string(),
        None => fallback.unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::agent::llm::fixtures::*;
    use crate::agent::llm::ScriptedBackend;
    use crate::browser::testing::{example_site, FakeBrowserService};
    use crate::browser::{BrowserAction, BrowserSessionManager, InMemorySessionIndex};
    use crate::collaborators::InMemoryWorkspace;
    use crate::tools::{AddWorkspaceItemTool, BrowserTool, DummyTool};

    fn executor() -> ToolExecutor {
        let mut executor = ToolExecutor::new();
        executor.register(DummyTool {
            name: "lookup".to_string(),
            result: "42".to_string(),
        });
        executor
    }

    fn browser_executor(service: Arc<FakeBrowserService>) -> ToolExecutor {
        let manager = Arc::new(BrowserSessionManager::new(
            service,
            Arc::new(InMemorySessionIndex::new()),
            15,
        ));
        let mut executor = ToolExecutor::new();
        for tool in BrowserTool::all(manager) {
            executor.register(tool);
        }
        executor
    }

    #[tokio::test]
    async fn test_text_only_terminates() {
        let backend = ScriptedBackend::gemini(fast(), vec![gemini_text("Hello, human!")]);
        let ctx = ExecutionContext::test("u1", "Hi there");
        let exec = executor();

        let outcome = AgentLoop::new(5)
            .run(&backend, &ctx, &exec.builtin_specs(), &exec)
            .await
            .unwrap();

        assert_eq!(outcome.text, "Hello, human!");
        assert_eq!(outcome.termination, Termination::Text);
        assert_eq!(outcome.steps, 1);
    }

    #[tokio::test]
    async fn test_step_ceiling_against_endless_tool_calls() {
        let backend = ScriptedBackend::claude(capable(), vec![])
            .repeating(claude_tool_use("toolu_x", "lookup", json!({})));
        let ctx = ExecutionContext::test("u1", "keep going forever");
        let exec = executor();

        let outcome = AgentLoop::new(5)
            .run(&backend, &ctx, &exec.builtin_specs(), &exec)
            .await
            .unwrap();

        assert_eq!(backend.calls(), 5);
        assert_eq!(outcome.steps, 5);
        assert_eq!(outcome.tool_calls, 5);
        assert_eq!(outcome.termination, Termination::StepBudget);
        assert_eq!(outcome.text, NO_FINAL_TEXT);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_text() {
        let mut with_text = gemini_call("lookup", json!({}));
        with_text["candidates"][0]["content"]["parts"]
            .as_array_mut()
            .unwrap()
            .insert(0, json!({"text": "Still looking..."}));
        let backend = ScriptedBackend::gemini(fast(), vec![]).repeating(with_text);
        let ctx = ExecutionContext::test("u1", "q");
        let exec = executor();

        let outcome = AgentLoop::new(3)
            .run(&backend, &ctx, &exec.builtin_specs(), &exec)
            .await
            .unwrap();

        assert_eq!(backend.calls(), 3);
        assert_eq!(outcome.text, "Still looking...");
    }

    #[tokio::test]
    async fn test_answer_wins_over_other_calls() {
        let workspace = Arc::new(InMemoryWorkspace::new());
        let mut exec = ToolExecutor::new();
        exec.register(AddWorkspaceItemTool::new(workspace.clone()));

        let backend = ScriptedBackend::claude(
            capable(),
            vec![claude_tool_uses(&[
                ("toolu_1", "add_workspace_item", json!({"destination": "tasks", "text": "x"})),
                ("toolu_2", "answer", json!({"text": "All done"})),
            ])],
        );
        let ctx = ExecutionContext::test("u1", "q");

        let outcome = AgentLoop::new(5)
            .run(&backend, &ctx, &exec.builtin_specs(), &exec)
            .await
            .unwrap();

        assert_eq!(outcome.text, "All done");
        assert_eq!(outcome.termination, Termination::Answer);
        assert_eq!(outcome.tool_calls, 0);
        assert!(workspace.entries().is_empty());
    }

    #[tokio::test]
    async fn test_claude_tool_results_follow_tool_use() {
        let backend = ScriptedBackend::claude(
            capable(),
            vec![
                claude_tool_uses(&[
                    ("toolu_1", "lookup", json!({})),
                    ("toolu_2", "missing_tool", json!({})),
                ]),
                claude_text("The answer is 42"),
            ],
        );
        let ctx = ExecutionContext::test("u1", "q");
        let exec = executor();

        let outcome = AgentLoop::new(5)
            .run(&backend, &ctx, &exec.builtin_specs(), &exec)
            .await
            .unwrap();
        assert_eq!(outcome.text, "The answer is 42");
        assert_eq!(outcome.usage.total_tokens, 28 + 16);

        let second = &backend.requests()[1];
        let assistant = &second[second.len() - 2];
        let results = &second[second.len() - 1];

        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["content"][0]["type"], "tool_use");
        assert_eq!(results["role"], "user");
        assert_eq!(results["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(results["content"][0]["is_error"], false);
        assert_eq!(results["content"][1]["tool_use_id"], "toolu_2");
        assert_eq!(results["content"][1]["is_error"], true);
    }

    #[tokio::test]
    async fn test_gemini_function_response_follows_call() {
        let backend = ScriptedBackend::gemini(
            fast(),
            vec![gemini_call("lookup", json!({})), gemini_call("answer", json!({"text": "42"}))],
        );
        let ctx = ExecutionContext::test("u1", "q");
        let exec = executor();

        let outcome = AgentLoop::new(5)
            .run(&backend, &ctx, &exec.builtin_specs(), &exec)
            .await
            .unwrap();
        assert_eq!(outcome.text, "42");

        let second = &backend.requests()[1];
        assert_eq!(second.len(), 3);
        assert_eq!(second[1]["role"], "model");
        assert_eq!(second[2]["role"], "function");
        assert_eq!(second[2]["parts"][0]["functionResponse"]["name"], "lookup");
        assert_eq!(second[2]["parts"][0]["functionResponse"]["response"]["result"], "42");
    }

    #[tokio::test]
    async fn test_navigate_click_answer_scenario() {
        let service = Arc::new(example_site());
        let exec = browser_executor(service.clone());
        let backend = ScriptedBackend::claude(
            capable(),
            vec![
                claude_tool_use("toolu_1", "browser_navigate", json!({"url": "example.com"})),
                claude_tool_use("toolu_2", "browser_click", json!({"selector": "#login"})),
                claude_tool_use("toolu_3", "answer", json!({"text": "Clicked Login; you're on the dashboard."})),
            ],
        );
        let ctx = ExecutionContext::test("alice", "Navigate to example.com and click Login");

        let outcome = AgentLoop::new(5)
            .run(&backend, &ctx, &exec.browser_specs(), &exec)
            .await
            .unwrap();

        assert_eq!(outcome.termination, Termination::Answer);
        assert_eq!(outcome.tool_calls, 2);

        // The click used a selector from the surface the navigate returned
        let second = &backend.requests()[1];
        let navigate_result = second[second.len() - 1]["content"][0]["content"].as_str().unwrap();
        assert!(navigate_result.contains("BUTTON: [#login] (Login)"));
        assert_eq!(
            service.actions(),
            vec![
                BrowserAction::Navigate { url: "https://example.com/".to_string() },
                BrowserAction::Click { selector: "#login".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let backend = ScriptedBackend::failing(capable());
        let ctx = ExecutionContext::test("u1", "q");
        let exec = executor();

        let result = AgentLoop::new(5).run(&backend, &ctx, &exec.builtin_specs(), &exec).await;
        assert!(result.is_err());
    }
}
