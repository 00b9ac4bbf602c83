//! Browser tools - one registered handler per browser action

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::context::ExecutionContext;
use crate::agent::message::ToolResult;
use crate::browser::{BrowserAction, BrowserSessionManager};
use crate::Result;

use super::{required_str, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Navigate,
    Type,
    Click,
    GetSurface,
}

/// A browser action exposed as a tool, running in the caller's session
pub struct BrowserTool {
    kind: Kind,
    manager: Arc<BrowserSessionManager>,
}

impl BrowserTool {
    /// Every browser tool, sharing one session manager.
    pub fn all(manager: Arc<BrowserSessionManager>) -> Vec<BrowserTool> {
        [Kind::Navigate, Kind::Type, Kind::Click, Kind::GetSurface]
            .into_iter()
            .map(|kind| BrowserTool {
                kind,
                manager: manager.clone(),
            })
            .collect()
    }

    fn action(&self, params: &Value) -> Result<BrowserAction> {
        Ok(match self.kind {
            Kind::Navigate => BrowserAction::Navigate {
                url: required_str(params, "url")?.to_string(),
            },
            Kind::Type => BrowserAction::Type {
                selector: required_str(params, "selector")?.to_string(),
                text: required_str(params, "text")?.to_string(),
            },
            Kind::Click => BrowserAction::Click {
                selector: required_str(params, "selector")?.to_string(),
            },
            Kind::GetSurface => BrowserAction::GetSurface,
        })
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        match self.kind {
            Kind::Navigate => "browser_navigate",
            Kind::Type => "browser_type",
            Kind::Click => "browser_click",
            Kind::GetSurface => "browser_get_surface",
        }
    }

    fn description(&self) -> &str {
        match self.kind {
            Kind::Navigate => "Open a URL in the browser. Returns the page's action surface.",
            Kind::Type => "Type text into an INPUT from the latest action surface.",
            Kind::Click => "Click a BUTTON or LINK from the latest action surface.",
            Kind::GetSurface => "Return the current page's action surface without changing it.",
        }
    }

    fn parameters(&self) -> Value {
        let selector = json!({
            "type": "string",
            "description": "Selector exactly as listed in the latest action surface"
        });
        match self.kind {
            Kind::Navigate => json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to open"}
                },
                "required": ["url"]
            }),
            Kind::Type => json!({
                "type": "object",
                "properties": {
                    "selector": selector,
                    "text": {"type": "string", "description": "Text to type"}
                },
                "required": ["selector", "text"]
            }),
            Kind::Click => json!({
                "type": "object",
                "properties": {"selector": selector},
                "required": ["selector"]
            }),
            Kind::GetSurface => json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let action = self.action(&params)?;
        let observation = self.manager.execute_for_user(&ctx.user_id, action).await?;
        debug!(
            "{} for {}: {}",
            self.name(),
            ctx.user_id,
            if observation.is_success() { "ok" } else { "failed" }
        );

        let text = observation.render();
        Ok(if observation.is_success() {
            ToolResult::ok(text)
        } else {
            ToolResult::failure(text)
        })
    }
}
