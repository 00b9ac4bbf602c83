//! Client for the browser automation service.
//!
//! The service owns the real browser contexts in memory. It speaks a small
//! JSON protocol:
//!
//! - `POST /sessions` creates a context and returns `{"session_id"}`
//! - `POST /sessions/{id}/actions` runs `{"action", "params"}` and returns the
//!   outcome plus a snapshot of the page's interactive elements
//! - `DELETE /sessions/{id}` releases the context
//!
//! A 404 on an action means the service no longer knows the session, which is
//! how a restart shows up.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::Result;

/// A primitive browser action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate { url: String },
    Type { selector: String, text: String },
    Click { selector: String },
    GetSurface,
}

impl BrowserAction {
    pub fn name(&self) -> &'static str {
        match self {
            BrowserAction::Navigate { .. } => "navigate",
            BrowserAction::Type { .. } => "type",
            BrowserAction::Click { .. } => "click",
            BrowserAction::GetSurface => "get_surface",
        }
    }

    /// Target selector for element actions.
    pub fn selector(&self) -> Option<&str> {
        match self {
            BrowserAction::Type { selector, .. } | BrowserAction::Click { selector } => Some(selector),
            _ => None,
        }
    }
}

/// Why an action did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ElementNotFound,
    NotVisible,
    NotEditable,
    SelectorNotInSurface,
    NavigationFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ElementNotFound => "element_not_found",
            FailureReason::NotVisible => "not_visible",
            FailureReason::NotEditable => "not_editable",
            FailureReason::SelectorNotInSurface => "selector_not_in_surface",
            FailureReason::NavigationFailed => "navigation_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An explicit, typed action failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub reason: FailureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActionFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.reason, detail),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// One element as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementSnapshot {
    pub tag: String,
    pub role: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub visible: bool,
    pub editable: bool,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// The page after an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub elements: Vec<ElementSnapshot>,
}

/// Service response to a single action.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub outcome: std::result::Result<String, ActionFailure>,
    pub page: Option<PageSnapshot>,
}

/// Request/response channel to the browser automation service.
#[async_trait]
pub trait BrowserService: Send + Sync {
    /// Create a fresh browser context and return its id.
    async fn create_session(&self) -> Result<String>;

    /// Run one action. `Error::SessionNotFound` when the id is unknown.
    async fn execute_action(&self, session_id: &str, action: &BrowserAction) -> Result<RawObservation>;

    /// Release the context.
    async fn destroy_session(&self, session_id: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct ActionResponse {
    ok: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    failure: Option<ActionFailure>,
    #[serde(default)]
    page: Option<PageSnapshot>,
}

/// HTTP client for the browser automation service.
pub struct HttpBrowserService {
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl HttpBrowserService {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            retry,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Status {
            service: "browser".to_string(),
            status,
            body,
        })
    }
}

#[async_trait]
impl BrowserService for HttpBrowserService {
    async fn create_session(&self) -> Result<String> {
        let url = &format!("{}/sessions", self.base_url);
        self.retry
            .run("browser create_session", move || async move {
                let response = self.client.post(url).send().await?;
                let created: CreateSessionResponse = Self::check(response).await?.json().await?;
                Ok(created.session_id)
            })
            .await
    }

    async fn execute_action(&self, session_id: &str, action: &BrowserAction) -> Result<RawObservation> {
        let url = &format!("{}/sessions/{}/actions", self.base_url, session_id);
        let what = format!("browser {}", action.name());

        let parsed: ActionResponse = self
            .retry
            .run(&what, move || async move {
                let response = self.client.post(url).json(action).send().await?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Err(Error::SessionNotFound(session_id.to_string()));
                }
                Ok(Self::check(response).await?.json().await?)
            })
            .await?;

        let outcome = match (parsed.ok, parsed.failure) {
            (true, _) => Ok(parsed.result.unwrap_or_default()),
            (false, Some(failure)) => Err(failure),
            (false, None) => {
                return Err(Error::Browser(format!(
                    "{} reported failure without a reason",
                    action.name()
                )))
            }
        };

        Ok(RawObservation {
            outcome,
            page: parsed.page,
        })
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        let url = &format!("{}/sessions/{}", self.base_url, session_id);
        self.retry
            .run("browser destroy_session", move || async move {
                let response = self.client.delete(url).send().await?;
                // Already gone is as good as destroyed
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(());
                }
                Self::check(response).await?;
                Ok(())
            })
            .await
    }
}
