//! Task categories and the category -> backend mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Category a request is classified into. Decides the backend and toolset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Simple,
    Retrieval,
    Browser,
    ExternalWorkspace,
    Complex,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 5] = [
        TaskCategory::Simple,
        TaskCategory::Retrieval,
        TaskCategory::Browser,
        TaskCategory::ExternalWorkspace,
        TaskCategory::Complex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Simple => "simple",
            TaskCategory::Retrieval => "retrieval",
            TaskCategory::Browser => "browser",
            TaskCategory::ExternalWorkspace => "external_workspace",
            TaskCategory::Complex => "complex",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        TaskCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| Error::Classification(format!("Unknown category: {s}")))
    }
}

/// Model provider behind a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Claude,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gemini => f.write_str("gemini"),
            Provider::Claude => f.write_str("claude"),
        }
    }
}

/// Cost/capability tier of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Cheap and fast, no means to act on the workspace beyond built-ins.
    Fast,
    /// Tool-capable, used for browser and external-workspace work.
    Capable,
}

/// A provider/model pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendConfig {
    pub provider: Provider,
    pub model: String,
    pub tier: Tier,
}

impl BackendConfig {
    pub fn new(provider: Provider, model: impl Into<String>, tier: Tier) -> Self {
        Self {
            provider,
            model: model.into(),
            tier,
        }
    }

    /// Identifier reported in results and used as the registry key.
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }

    pub fn is_fast(&self) -> bool {
        self.tier == Tier::Fast
    }
}

/// Fixed mapping from category to backend, plus fallback and classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTable {
    pub simple: BackendConfig,
    pub retrieval: BackendConfig,
    pub browser: BackendConfig,
    pub external_workspace: BackendConfig,
    pub complex: BackendConfig,
    /// Used only when the primary backend fails.
    pub fallback: BackendConfig,
    /// Lightweight model that labels requests.
    pub classifier: BackendConfig,
}

impl Default for RoutingTable {
    fn default() -> Self {
        let fast = BackendConfig::new(Provider::Gemini, "gemini-2.0-flash", Tier::Fast);
        let capable = BackendConfig::new(Provider::Claude, "claude-sonnet-4-5", Tier::Capable);
        Self {
            simple: fast.clone(),
            retrieval: fast.clone(),
            browser: capable.clone(),
            external_workspace: capable.clone(),
            complex: capable,
            fallback: fast.clone(),
            classifier: fast,
        }
    }
}

impl RoutingTable {
    pub fn for_category(&self, category: TaskCategory) -> &BackendConfig {
        match category {
            TaskCategory::Simple => &self.simple,
            TaskCategory::Retrieval => &self.retrieval,
            TaskCategory::Browser => &self.browser,
            TaskCategory::ExternalWorkspace => &self.external_workspace,
            TaskCategory::Complex => &self.complex,
        }
    }

    /// Backend used when a fast backend must be escalated to one with tools.
    pub fn tool_capable(&self) -> &BackendConfig {
        &self.external_workspace
    }

    /// Every configured backend, deduplicated.
    pub fn all(&self) -> Vec<&BackendConfig> {
        let mut out: Vec<&BackendConfig> = Vec::new();
        for backend in [
            &self.simple,
            &self.retrieval,
            &self.browser,
            &self.external_workspace,
            &self.complex,
            &self.fallback,
            &self.classifier,
        ] {
            if !out.contains(&backend) {
                out.push(backend);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse() {
        assert_eq!("Simple".parse::<TaskCategory>().unwrap(), TaskCategory::Simple);
        assert_eq!(
            "external workspace".parse::<TaskCategory>().unwrap(),
            TaskCategory::ExternalWorkspace
        );
        assert_eq!(
            "external-workspace".parse::<TaskCategory>().unwrap(),
            TaskCategory::ExternalWorkspace
        );
        assert!("weather".parse::<TaskCategory>().is_err());
    }

    #[test]
    fn test_default_routing() {
        let table = RoutingTable::default();
        assert!(table.for_category(TaskCategory::Simple).is_fast());
        assert!(!table.for_category(TaskCategory::Browser).is_fast());
        assert!(table.fallback.is_fast());
        assert_eq!(table.all().len(), 2);
    }

    #[test]
    fn test_backend_id() {
        let backend = BackendConfig::new(Provider::Claude, "claude-sonnet-4-5", Tier::Capable);
        assert_eq!(backend.id(), "claude/claude-sonnet-4-5");
    }
}
