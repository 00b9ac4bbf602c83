//! Per-request execution context and prompt seeding.
//!
//! An [`ExecutionContext`] is built once per incoming request and is read-only
//! for the rest of orchestration. The agent loop and every tool receive it by
//! reference.

use std::sync::Arc;

use crate::collaborators::CredentialStore;

use super::message::ChatTurn;

/// Retrieved context longer than this is truncated before seeding.
const MAX_CONTEXT_CHARS: usize = 12_000;

/// Default number of prior turns rendered into a request.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Everything the orchestrator knows about one request.
#[derive(Clone)]
pub struct ExecutionContext {
    pub user_id: String,
    pub query: String,
    pub history: Vec<ChatTurn>,
    pub retrieved_context: String,
    pub credentials: Arc<dyn CredentialStore>,
    history_window: usize,
}

impl ExecutionContext {
    pub fn new(
        user_id: impl Into<String>,
        query: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            history: Vec::new(),
            retrieved_context: String::new(),
            credentials,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_retrieved_context(mut self, context: impl Into<String>) -> Self {
        self.retrieved_context = context.into();
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Context for tests: no credentials, no history.
    #[cfg(test)]
    pub fn test(user_id: &str, query: &str) -> Self {
        Self::new(user_id, query, Arc::new(crate::collaborators::InMemoryCredentials::new()))
    }

    pub fn has_retrieved_context(&self) -> bool {
        !self.retrieved_context.trim().is_empty()
    }

    /// Last `history_window` turns, oldest first.
    pub fn windowed_history(&self) -> &[ChatTurn] {
        if self.history.len() > self.history_window {
            &self.history[self.history.len() - self.history_window..]
        } else {
            &self.history
        }
    }

    /// The user message that opens the loop: retrieved context (if any)
    /// followed by the query.
    pub fn seed_message(&self) -> String {
        if !self.has_retrieved_context() {
            return self.query.clone();
        }

        let context = truncate_chars(self.retrieved_context.trim(), MAX_CONTEXT_CHARS);
        format!(
            "# Retrieved context\n\n{}\n\n---\n\n# Request\n\n{}",
            context, self.query
        )
    }

    /// System instructions shared by every backend.
    pub fn system_prompt(&self, answer_tool: &str, tool_names: &[String]) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        let mut prompt = format!(
            r#"You are Switchboard, an assistant that completes requests by calling tools.

## Current Time
{now}

## Finishing
When you have the final answer, call `{answer_tool}` with the complete reply in `text`.
Do not describe an action as done unless a tool result confirmed it."#
        );

        if tool_names.iter().any(|n| n.starts_with(crate::tools::BROWSER_PREFIX)) {
            prompt.push_str(
                r#"

## Browser
Every browser action returns the page's action surface: lines like
`BUTTON: [#login] (Login)`. Only use selectors that appear in the most recent
surface. If an element is missing, call `browser_get_surface` or navigate again
instead of guessing a selector."#,
            );
        }

        if !tool_names.is_empty() {
            prompt.push_str("\n\n## Tools\n");
            for name in tool_names {
                prompt.push_str(&format!("- `{name}`\n"));
            }
        }

        prompt
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!(
            "{}\n\n[Truncated - {} total chars]",
            &text[..idx],
            text.chars().count()
        ),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_without_context_is_query() {
        let ctx = ExecutionContext::test("u1", "What's 2+2?");
        assert_eq!(ctx.seed_message(), "What's 2+2?");
        assert!(!ctx.has_retrieved_context());
    }

    #[test]
    fn test_seed_with_context() {
        let ctx = ExecutionContext::test("u1", "Summarize my notes")
            .with_retrieved_context("Note: buy milk");
        let seed = ctx.seed_message();
        assert!(seed.contains("buy milk"));
        assert!(seed.ends_with("Summarize my notes"));
    }

    #[test]
    fn test_long_context_truncated() {
        let ctx = ExecutionContext::test("u1", "q")
            .with_retrieved_context("x".repeat(MAX_CONTEXT_CHARS + 500));
        let seed = ctx.seed_message();
        assert!(seed.contains("[Truncated"));
        assert!(seed.len() < MAX_CONTEXT_CHARS + 200);
    }

    #[test]
    fn test_history_windowing() {
        let history: Vec<ChatTurn> = (0..50).map(|i| ChatTurn::user(format!("Message {i}"))).collect();
        let ctx = ExecutionContext::test("u1", "Current")
            .with_history(history)
            .with_history_window(10);

        let window = ctx.windowed_history();
        assert_eq!(window.len(), 10);
        assert!(window.last().unwrap().text.contains("49"));
    }

    #[test]
    fn test_system_prompt_mentions_surface_for_browser() {
        let ctx = ExecutionContext::test("u1", "q");
        let names = vec!["answer".to_string(), "browser_click".to_string()];
        let prompt = ctx.system_prompt("answer", &names);
        assert!(prompt.contains("action surface"));

        let plain = ctx.system_prompt("answer", &["answer".to_string()]);
        assert!(!plain.contains("action surface"));
    }
}
