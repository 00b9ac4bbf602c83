//! Task classification: a lightweight model call followed by deterministic
//! override rules.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::llm::ModelBackend;
use crate::error::Error;
use crate::Result;

use super::routing::{BackendConfig, RoutingTable, TaskCategory};

const CLASSIFIER_PROMPT: &str = r#"You label user requests for a task router.

Categories:
- simple: small talk, general knowledge, quick notes to the built-in workspace
- retrieval: questions answered from the user's own stored context
- browser: anything that needs a web browser (open a site, click, fill a form)
- external_workspace: reading or changing pages, tasks or documents in the user's external workspace
- complex: multi-step work that mixes several of the above

Reply with exactly one category name and nothing else."#;

const SEARCH_VERBS: &str = r"(?i)\b(search|find|list|show|look\s+up|lookup)\b";
const WORKSPACE_NOUNS: &str = r"(?i)\b(tasks?|notes?|ideas?|documents?|docs?)\b";
const CREATE_VERBS: &str = r"(?i)\b(create|add|save|jot|write\s+down)\b";
const CONTENT_NOUNS: &str = r"(?i)\b(notes?|pages?|documents?|ideas?)\b";

/// Deterministic rule that corrected the model's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideRule {
    /// The reserved workspace keyword appeared in the query.
    WorkspaceKeyword,
    /// A simple request searches workspace content.
    WorkspaceSearch,
    /// A fast backend was asked to create workspace content.
    ContentCreation,
}

impl fmt::Display for OverrideRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideRule::WorkspaceKeyword => f.write_str("workspace keyword"),
            OverrideRule::WorkspaceSearch => f.write_str("workspace search"),
            OverrideRule::ContentCreation => f.write_str("content creation"),
        }
    }
}

/// Category and backend chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub category: TaskCategory,
    pub backend: BackendConfig,
    /// What the model answered, `None` when the call failed.
    pub model_category: Option<TaskCategory>,
    /// Rules that fired, in order.
    pub overrides: Vec<OverrideRule>,
    /// The backend was swapped for the tool-capable one.
    pub escalated: bool,
}

struct Rules {
    search_verbs: Regex,
    workspace_nouns: Regex,
    create_verbs: Regex,
    content_nouns: Regex,
}

impl Rules {
    fn compile() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Classification(format!("Invalid rule {}: {}", pattern, e)))
        };
        Ok(Self {
            search_verbs: compile(SEARCH_VERBS)?,
            workspace_nouns: compile(WORKSPACE_NOUNS)?,
            create_verbs: compile(CREATE_VERBS)?,
            content_nouns: compile(CONTENT_NOUNS)?,
        })
    }

    fn is_workspace_search(&self, query: &str) -> bool {
        self.search_verbs.is_match(query) && self.workspace_nouns.is_match(query)
    }

    fn is_content_creation(&self, query: &str) -> bool {
        self.create_verbs.is_match(query) && self.content_nouns.is_match(query)
    }
}

/// Labels requests with a [`TaskCategory`] and picks their backend.
pub struct TaskClassifier {
    backend: Option<Arc<dyn ModelBackend>>,
    keyword: String,
    routing: RoutingTable,
    rules: Rules,
}

impl TaskClassifier {
    /// `backend` is the lightweight labelling model. Without one every
    /// request starts out as [`TaskCategory::Simple`].
    pub fn new(backend: Option<Arc<dyn ModelBackend>>, keyword: &str, routing: RoutingTable) -> Result<Self> {
        Ok(Self {
            backend,
            keyword: keyword.trim().to_lowercase(),
            routing,
            rules: Rules::compile()?,
        })
    }

    /// Category for a request after every override rule.
    pub async fn classify(&self, query: &str, has_context: bool) -> TaskCategory {
        self.route(query, has_context).await.category
    }

    /// Category plus backend, with overrides applied.
    pub async fn route(&self, query: &str, has_context: bool) -> Route {
        let model_category = match self.ask_model(query, has_context).await {
            Ok(category) => Some(category),
            Err(e) => {
                warn!("Classification failed, defaulting to simple: {}", e);
                None
            }
        };

        let route = self.apply_rules(query, has_context, model_category);
        info!(
            "Classified as {} -> {}{}",
            route.category,
            route.backend.id(),
            if route.overrides.is_empty() {
                String::new()
            } else {
                format!(
                    " (overrides: {})",
                    route.overrides.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
                )
            }
        );
        route
    }

    fn apply_rules(&self, query: &str, has_context: bool, model_category: Option<TaskCategory>) -> Route {
        let mut category = model_category.unwrap_or(TaskCategory::Simple);
        let mut overrides = Vec::new();

        if self.has_keyword(query) {
            category = TaskCategory::ExternalWorkspace;
            overrides.push(OverrideRule::WorkspaceKeyword);
        } else if category == TaskCategory::Simple && self.rules.is_workspace_search(query) {
            category = if has_context {
                TaskCategory::Retrieval
            } else {
                TaskCategory::ExternalWorkspace
            };
            overrides.push(OverrideRule::WorkspaceSearch);
        }

        let mut backend = self.routing.for_category(category).clone();
        let mut escalated = false;
        if backend.is_fast() && self.rules.is_content_creation(query) {
            backend = self.routing.tool_capable().clone();
            escalated = !backend.is_fast();
            if escalated {
                overrides.push(OverrideRule::ContentCreation);
            }
        }

        Route {
            category,
            backend,
            model_category,
            overrides,
            escalated,
        }
    }

    fn has_keyword(&self, query: &str) -> bool {
        !self.keyword.is_empty() && query.to_lowercase().contains(&self.keyword)
    }

    async fn ask_model(&self, query: &str, has_context: bool) -> Result<TaskCategory> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| Error::Classification("No classifier backend configured".to_string()))?;

        let prompt = format!(
            "Request: {}\nRelevant stored context found: {}",
            query,
            if has_context { "yes" } else { "no" }
        );
        let adapter = backend.adapter();
        let messages = adapter.render_history(&[], &prompt);
        let raw = backend.send(CLASSIFIER_PROMPT, &messages, &Value::Null).await?;
        let text = adapter.parse_response(&raw)?.text.unwrap_or_default();

        debug!("Classifier replied: {}", text.trim());
        parse_category(&text)
    }
}

/// Find the category named in a model reply, tolerating extra words.
fn parse_category(reply: &str) -> Result<TaskCategory> {
    if let Ok(category) = reply.parse::<TaskCategory>() {
        return Ok(category);
    }

    let normalized = reply.to_lowercase().replace([' ', '-'], "_");
    TaskCategory::ALL
        .into_iter()
        .filter_map(|c| normalized.find(c.as_str()).map(|pos| (pos, c)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, c)| c)
        .ok_or_else(|| Error::Classification(format!("No category in reply: {}", reply.trim())))
}
