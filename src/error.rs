//! Error types for Switchboard

use thiserror::Error;

/// Result type alias for Switchboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Switchboard
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Browser session not found: {0}")]
    SessionNotFound(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Primary backend {primary} failed and fallback {fallback} failed too")]
    BackendsExhausted { primary: String, fallback: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Status { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryable() {
        let overloaded = Error::Status {
            service: "gemini".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(overloaded.is_retryable());

        let rate_limited = Error::Status {
            service: "claude".to_string(),
            status: 429,
            body: String::new(),
        };
        assert!(rate_limited.is_retryable());

        let unauthorized = Error::Status {
            service: "claude".to_string(),
            status: 401,
            body: "invalid x-api-key".to_string(),
        };
        assert!(!unauthorized.is_retryable());
    }

    #[test]
    fn test_logic_errors_not_retryable() {
        assert!(!Error::Llm("No candidates in response".to_string()).is_retryable());
        assert!(!Error::SessionNotFound("s1".to_string()).is_retryable());
    }
}
