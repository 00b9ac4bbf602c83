//! Model backends and their tool-calling protocol adapters.
//!
//! This module provides:
//! - [`ProviderAdapter`]: the four conversions between the neutral types and a
//!   provider's native JSON (tools, history, response, tool results)
//! - [`ModelBackend`]: a configured backend that can `send` a native request
//! - [`BackendRegistry`]: backends keyed by their [`BackendConfig`]
//! - Concrete implementations: Gemini function calling, Claude tool use
//!
//! The agent loop only ever talks to these two traits, so it has no
//! provider-specific branches.
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `openai.rs`) with an adapter and a client
//! 2. Implement `ProviderAdapter` and `ModelBackend`
//! 3. Add a [`Provider`] variant and a branch in `BackendRegistry::from_config()`

mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::error::Error;
use crate::orchestrator::{BackendConfig, Provider};
use crate::tools::ToolSpec;
use crate::Result;

pub use types::*;

pub mod claude;
pub mod gemini;

pub use claude::{ClaudeAdapter, ClaudeClient};
pub use gemini::{GeminiAdapter, GeminiClient};

use super::message::{ChatTurn, ToolInvocation, ToolResult};

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A provider response reduced to what the loop needs.
#[derive(Debug, Clone)]
pub struct ParsedTurn {
    /// Free text emitted alongside (or instead of) tool calls.
    pub text: Option<String>,

    /// Tool calls in the order the provider emitted them.
    pub invocations: Vec<ToolInvocation>,

    /// Token usage for this call.
    pub usage: Usage,

    /// The model's message in native shape, appended to the conversation
    /// before the tool results.
    pub native: Value,
}

impl ParsedTurn {
    #[inline]
    pub fn has_invocations(&self) -> bool {
        !self.invocations.is_empty()
    }
}

/// Conversions between neutral types and one provider's native JSON.
pub trait ProviderAdapter: Send + Sync {
    /// Tool declarations in the provider's request shape. `Value::Null` when
    /// there is nothing to declare.
    fn render_tools(&self, tools: &[ToolSpec]) -> Value;

    /// Prior turns plus the seed user message as native messages.
    fn render_history(&self, history: &[ChatTurn], seed: &str) -> Vec<Value>;

    /// Split a raw response into text and tool invocations.
    fn parse_response(&self, raw: &Value) -> Result<ParsedTurn>;

    /// The single native message carrying results for one turn's invocations.
    fn render_tool_result(&self, results: &[(ToolInvocation, ToolResult)]) -> Value;
}

/// A configured model backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Provider/model this backend talks to.
    fn config(&self) -> &BackendConfig;

    /// Protocol adapter for this backend's provider.
    fn adapter(&self) -> &dyn ProviderAdapter;

    /// Send one request and return the raw provider response.
    async fn send(&self, system: &str, messages: &[Value], tools: &Value) -> Result<Value>;

    /// Identifier reported in results.
    fn id(&self) -> String {
        self.config().id()
    }
}

/// Backends keyed by their configuration.
///
/// # Example
///
/// ```ignore
/// let backends = BackendRegistry::from_config(&config)?;
/// let backend = backends.get(&config.routing.simple)?;
/// ```
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<BackendConfig, Arc<dyn ModelBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client for every backend the routing table references.
    ///
    /// Backends whose API key is missing are skipped with a warning; routing
    /// to them later fails, which triggers the fallback policy.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        let retry = config.retry.policy();

        for backend in config.backends() {
            match backend.provider {
                Provider::Gemini if !config.gemini_api_key.is_empty() => {
                    registry.insert(Arc::new(GeminiClient::new(
                        &config.gemini_api_key,
                        backend.clone(),
                        retry.clone(),
                    )));
                }
                Provider::Claude if !config.anthropic_api_key.is_empty() => {
                    registry.insert(Arc::new(ClaudeClient::new(
                        &config.anthropic_api_key,
                        backend.clone(),
                        retry.clone(),
                    )));
                }
                provider => {
                    warn!("No API key for {}, backend {} disabled", provider, backend.id());
                }
            }
        }

        if registry.backends.is_empty() {
            return Err(Error::Config(
                "No backend has an API key. Set gemini_api_key or anthropic_api_key.".to_string(),
            ));
        }

        Ok(registry)
    }

    pub fn insert(&mut self, backend: Arc<dyn ModelBackend>) {
        self.backends.insert(backend.config().clone(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.insert(backend);
        self
    }

    pub fn get(&self, config: &BackendConfig) -> Result<Arc<dyn ModelBackend>> {
        self.backends
            .get(config)
            .cloned()
            .ok_or_else(|| Error::Config(format!("Backend {} is not configured", config.id())))
    }

    pub fn contains(&self, config: &BackendConfig) -> bool {
        self.backends.contains_key(config)
    }
}

/// Scripted backend for testing.
///
/// Replays raw provider responses in order through a real adapter, so tests
/// exercise the provider's wire shapes as well as the loop.
#[cfg(test)]
pub struct ScriptedBackend {
    config: BackendConfig,
    adapter: Box<dyn ProviderAdapter>,
    script: std::sync::Mutex<std::collections::VecDeque<Scripted>>,
    repeat: Option<Value>,
    calls: std::sync::atomic::AtomicUsize,
    requests: std::sync::Mutex<Vec<Vec<Value>>>,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(Value),
    /// Simulates a provider outage (HTTP 503).
    Fail,
}

#[cfg(test)]
impl ScriptedBackend {
    fn with_adapter(config: BackendConfig, adapter: Box<dyn ProviderAdapter>, script: Vec<Scripted>) -> Self {
        Self {
            config,
            adapter,
            script: std::sync::Mutex::new(script.into()),
            repeat: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Backend speaking Gemini's wire format.
    pub fn gemini(config: BackendConfig, responses: Vec<Value>) -> Self {
        let script = responses.into_iter().map(Scripted::Respond).collect();
        Self::with_adapter(config, Box::new(GeminiAdapter), script)
    }

    /// Backend speaking Claude's wire format.
    pub fn claude(config: BackendConfig, responses: Vec<Value>) -> Self {
        let script = responses.into_iter().map(Scripted::Respond).collect();
        Self::with_adapter(config, Box::new(ClaudeAdapter), script)
    }

    /// Backend whose every call fails.
    pub fn failing(config: BackendConfig) -> Self {
        let adapter: Box<dyn ProviderAdapter> = match config.provider {
            Provider::Gemini => Box::new(GeminiAdapter),
            Provider::Claude => Box::new(ClaudeAdapter),
        };
        Self::with_adapter(config, adapter, Vec::new())
    }

    /// Backend with an explicit script of responses and failures.
    pub fn scripted(config: BackendConfig, script: Vec<Scripted>) -> Self {
        let adapter: Box<dyn ProviderAdapter> = match config.provider {
            Provider::Gemini => Box::new(GeminiAdapter),
            Provider::Claude => Box::new(ClaudeAdapter),
        };
        Self::with_adapter(config, adapter, script)
    }

    /// Once the script runs out, answer every call with `response`.
    pub fn repeating(mut self, response: Value) -> Self {
        self.repeat = Some(response);
        self
    }

    /// Number of `send` calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Native message lists sent, one entry per call.
    pub fn requests(&self) -> Vec<Vec<Value>> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    async fn send(&self, _system: &str, messages: &[Value], _tools: &Value) -> Result<Value> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Respond(value)) => Ok(value),
            Some(Scripted::Fail) => Err(Error::Status {
                service: self.config.id(),
                status: 503,
                body: "service unavailable".to_string(),
            }),
            None => match &self.repeat {
                Some(value) => Ok(value.clone()),
                None => Err(Error::Status {
                    service: self.config.id(),
                    status: 503,
                    body: "no scripted response".to_string(),
                }),
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn test_scripted_backend_replays() {
        let backend = ScriptedBackend::gemini(fast(), vec![gemini_text("Hello!"), gemini_text("World!")]);

        let raw = backend.send("", &[], &Value::Null).await.unwrap();
        let turn = backend.adapter().parse_response(&raw).unwrap();
        assert_eq!(turn.text.as_deref(), Some("Hello!"));

        backend.send("", &[], &Value::Null).await.unwrap();
        assert!(backend.send("", &[], &Value::Null).await.is_err());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = BackendRegistry::new().with(Arc::new(ScriptedBackend::gemini(fast(), vec![])));
        assert!(registry.contains(&fast()));
        assert!(registry.get(&fast()).is_ok());
        assert!(matches!(registry.get(&capable()), Err(Error::Config(_))));
    }

    #[test]
    fn test_registry_requires_a_key() {
        let mut config = Config::default();
        config.gemini_api_key.clear();
        config.anthropic_api_key.clear();
        assert!(BackendRegistry::from_config(&config).is_err());

        config.gemini_api_key = "g".to_string();
        let registry = BackendRegistry::from_config(&config).unwrap();
        assert!(registry.contains(&config.routing.simple));
        assert!(!registry.contains(&config.routing.browser));
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(&Usage { prompt_tokens: 3, completion_tokens: 2, total_tokens: 5 });
        total.add(&Usage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 });
        assert_eq!(total.total_tokens, 7);
    }
}
