//! Gemini function-calling backend.
//!
//! Multi-turn tool exchange is a `model` message holding `functionCall` parts,
//! answered by one `function` message holding a `functionResponse` part per call.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::agent::message::{ChatTurn, Role, ToolInvocation, ToolResult};
use crate::error::Error;
use crate::orchestrator::BackendConfig;
use crate::retry::RetryPolicy;
use crate::tools::ToolSpec;
use crate::Result;

use super::{GeminiResponse, ModelBackend, ParsedTurn, ProviderAdapter, Usage};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// JSON Schema keys Gemini's function declarations reject.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &[
    "$schema",
    "$id",
    "$defs",
    "definitions",
    "additionalProperties",
    "examples",
    "default",
];

/// Protocol adapter for Gemini's function calling.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn render_tools(&self, tools: &[ToolSpec]) -> Value {
        if tools.is_empty() {
            return Value::Null;
        }

        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                let mut decl = json!({
                    "name": t.name,
                    "description": t.description,
                });
                // An OBJECT with no properties is rejected, so omit it entirely
                if has_properties(&t.parameters) {
                    decl["parameters"] = sanitize_schema(&t.parameters);
                }
                decl
            })
            .collect();

        json!([{
            "functionDeclarations": function_declarations
        }])
    }

    fn render_history(&self, history: &[ChatTurn], seed: &str) -> Vec<Value> {
        let mut contents: Vec<Value> = history
            .iter()
            .filter(|t| !t.text.trim().is_empty())
            .map(|t| {
                let role = match t.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({"role": role, "parts": [{"text": t.text}]})
            })
            .collect();

        contents.push(json!({"role": "user", "parts": [{"text": seed}]}));
        contents
    }

    fn parse_response(&self, raw: &Value) -> Result<ParsedTurn> {
        let response: GeminiResponse = serde_json::from_value(raw.clone())?;
        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| Error::Llm("No candidates in response".to_string()))?;

        let mut texts = Vec::new();
        let mut invocations = Vec::new();

        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(ref text) = part.text {
                    if !text.trim().is_empty() {
                        texts.push(text.clone());
                    }
                }

                if let Some(ref fc) = part.function_call {
                    let id = fc
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", invocations.len()));
                    invocations.push(ToolInvocation::new(id, fc.name.clone(), fc.args.clone()));
                }
            }
        }

        let usage = response
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        // Echo the model's content back verbatim so provider-only fields survive
        let mut native = raw["candidates"][0]["content"].clone();
        if !native.is_object() {
            native = json!({"parts": []});
        }
        native["role"] = json!("model");

        Ok(ParsedTurn {
            text: if texts.is_empty() { None } else { Some(texts.join("\n")) },
            invocations,
            usage,
            native,
        })
    }

    fn render_tool_result(&self, results: &[(ToolInvocation, ToolResult)]) -> Value {
        let parts: Vec<Value> = results
            .iter()
            .map(|(call, result)| {
                json!({
                    "functionResponse": {
                        "name": call.name,
                        "response": {
                            "success": result.success,
                            "result": result.output.to_value()
                        }
                    }
                })
            })
            .collect();

        json!({
            "role": "function",
            "parts": parts
        })
    }
}

fn has_properties(schema: &Value) -> bool {
    schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|p| !p.is_empty())
        .unwrap_or(false)
}

/// Strip schema keys Gemini rejects, recursively.
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

/// Gemini API client using API key authentication.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    config: BackendConfig,
    client: Client,
    retry: RetryPolicy,
}

impl GeminiClient {
    /// Create a new Gemini client with API key.
    pub fn new(api_key: &str, config: BackendConfig, retry: RetryPolicy) -> Self {
        Self {
            api_key: api_key.to_string(),
            config,
            client: Client::new(),
            retry,
        }
    }

    fn build_url(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_URL, self.config.model, self.api_key
        )
    }
}

#[async_trait]
impl ModelBackend for GeminiClient {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn adapter(&self) -> &dyn ProviderAdapter {
        &GeminiAdapter
    }

    async fn send(&self, system: &str, messages: &[Value], tools: &Value) -> Result<Value> {
        let mut request = json!({
            "contents": messages,
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 8192
            }
        });

        if !system.is_empty() {
            request["systemInstruction"] = json!({
                "parts": [{"text": system}]
            });
        }

        if !tools.is_null() {
            request["tools"] = tools.clone();
        }

        let url = &self.build_url();
        let request = &request;
        self.retry
            .run("gemini generateContent", move || async move {
                let response = self.client.post(url).json(request).send().await?;

                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Status {
                        service: "gemini".to_string(),
                        status,
                        body,
                    });
                }

                Ok(response.json::<Value>().await?)
            })
            .await
    }
}
