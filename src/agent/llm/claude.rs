//! Claude tool-use backend.
//!
//! Multi-turn tool exchange is an `assistant` message holding `tool_use`
//! blocks, answered by one `user` message holding a `tool_result` block per
//! tool-use id.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::agent::message::{ChatTurn, Role, ToolInvocation, ToolResult};
use crate::error::Error;
use crate::orchestrator::BackendConfig;
use crate::retry::RetryPolicy;
use crate::tools::ToolSpec;
use crate::Result;

use super::{ClaudeResponse, ContentBlock, ModelBackend, ParsedTurn, ProviderAdapter, Usage};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Protocol adapter for Claude's tool use.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeAdapter;

impl ProviderAdapter for ClaudeAdapter {
    fn render_tools(&self, tools: &[ToolSpec]) -> Value {
        if tools.is_empty() {
            return Value::Null;
        }

        let rendered: Vec<Value> = tools
            .iter()
            .map(|t| {
                let mut schema = t.parameters.clone();
                if !schema.is_object() {
                    schema = json!({"type": "object", "properties": {}});
                }
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": schema
                })
            })
            .collect();

        Value::Array(rendered)
    }

    fn render_history(&self, history: &[ChatTurn], seed: &str) -> Vec<Value> {
        let mut messages: Vec<Value> = history
            .iter()
            .filter(|t| !t.text.trim().is_empty())
            .map(|t| {
                let role = match t.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({"role": role, "content": t.text})
            })
            .collect();

        // The conversation must open with a user turn
        while messages.first().map(|m| m["role"] == "assistant").unwrap_or(false) {
            messages.remove(0);
        }

        messages.push(json!({"role": "user", "content": seed}));
        messages
    }

    fn parse_response(&self, raw: &Value) -> Result<ParsedTurn> {
        let response: ClaudeResponse = serde_json::from_value(raw.clone())?;
        if response.content.is_empty() && response.stop_reason.is_none() {
            return Err(Error::Llm("Empty response from Claude".to_string()));
        }

        let mut texts = Vec::new();
        let mut invocations = Vec::new();

        for block in &response.content {
            match block {
                ContentBlock::Text { text } => {
                    if !text.trim().is_empty() {
                        texts.push(text.clone());
                    }
                }
                ContentBlock::ToolUse { id, name, input } => {
                    invocations.push(ToolInvocation::new(id.clone(), name.clone(), input.clone()));
                }
                ContentBlock::Other => {}
            }
        }

        let usage = response
            .usage
            .as_ref()
            .map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            })
            .unwrap_or_default();

        Ok(ParsedTurn {
            text: if texts.is_empty() { None } else { Some(texts.join("\n")) },
            invocations,
            usage,
            native: json!({
                "role": "assistant",
                "content": raw["content"].clone()
            }),
        })
    }

    fn render_tool_result(&self, results: &[(ToolInvocation, ToolResult)]) -> Value {
        let blocks: Vec<Value> = results
            .iter()
            .map(|(call, result)| {
                json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": result.output.to_text(),
                    "is_error": !result.success
                })
            })
            .collect();

        json!({
            "role": "user",
            "content": blocks
        })
    }
}

/// Claude Messages API client.
#[derive(Clone)]
pub struct ClaudeClient {
    api_key: String,
    config: BackendConfig,
    client: Client,
    retry: RetryPolicy,
}

impl ClaudeClient {
    pub fn new(api_key: &str, config: BackendConfig, retry: RetryPolicy) -> Self {
        Self {
            api_key: api_key.to_string(),
            config,
            client: Client::new(),
            retry,
        }
    }
}

#[async_trait]
impl ModelBackend for ClaudeClient {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn adapter(&self) -> &dyn ProviderAdapter {
        &ClaudeAdapter
    }

    async fn send(&self, system: &str, messages: &[Value], tools: &Value) -> Result<Value> {
        let mut request = json!({
            "model": self.config.model,
            "max_tokens": MAX_TOKENS,
            "messages": messages,
        });

        if !system.is_empty() {
            request["system"] = json!(system);
        }

        if !tools.is_null() {
            request["tools"] = tools.clone();
        }

        let request = &request;
        self.retry
            .run("claude messages", move || async move {
                let response = self
                    .client
                    .post(CLAUDE_API_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(request)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Status {
                        service: "claude".to_string(),
                        status,
                        body,
                    });
                }

                Ok(response.json::<Value>().await?)
            })
            .await
    }
}
