//! External collaborators the orchestrator talks to as plain request/response
//! calls: context retrieval, simple workspace writes and per-user credentials.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::Result;

/// Produces the retrieved-context block for a request.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(&self, user_id: &str, query: &str) -> Result<String>;
}

/// Writes a piece of text to a named destination in the user's workspace.
#[async_trait]
pub trait WorkspaceWriter: Send + Sync {
    async fn write(&self, user_id: &str, destination: &str, text: &str) -> Result<()>;
}

/// Looks up stored credentials for a user.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Token for the user's external workspace, if one is stored.
    async fn workspace_token(&self, user_id: &str) -> Result<Option<String>>;
}

/// Retriever that never finds anything.
pub struct NoRetrieval;

#[async_trait]
impl ContextRetriever for NoRetrieval {
    async fn retrieve(&self, _user_id: &str, _query: &str) -> Result<String> {
        Ok(String::new())
    }
}

/// Retriever backed by an HTTP endpoint.
///
/// Sends `{"user_id", "query"}` and expects `{"context": "..."}` back.
pub struct HttpContextRetriever {
    url: String,
    client: Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct RetrievalRequest<'a> {
    user_id: &'a str,
    query: &'a str,
}

#[derive(Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    context: String,
}

impl HttpContextRetriever {
    pub fn new(url: &str, retry: RetryPolicy) -> Self {
        Self {
            url: url.to_string(),
            client: Client::new(),
            retry,
        }
    }
}

#[async_trait]
impl ContextRetriever for HttpContextRetriever {
    async fn retrieve(&self, user_id: &str, query: &str) -> Result<String> {
        let body = &RetrievalRequest { user_id, query };
        self.retry
            .run("retrieval", move || async move {
                let response = self.client.post(&self.url).json(body).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::Status {
                        service: "retrieval".to_string(),
                        status: status.as_u16(),
                        body: response.text().await.unwrap_or_default(),
                    });
                }
                let parsed: RetrievalResponse = response.json().await?;
                Ok(parsed.context)
            })
            .await
    }
}

/// Workspace writer that appends timestamped entries to markdown files.
///
/// Each user gets `<root>/<user>/<destination>.md`.
pub struct FileWorkspaceWriter {
    root: PathBuf,
}

impl FileWorkspaceWriter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn destination_path(&self, user_id: &str, destination: &str) -> Result<PathBuf> {
        let user = sanitize_name(user_id)
            .ok_or_else(|| Error::Tool(format!("Invalid user id: {user_id}")))?;
        let dest = sanitize_name(destination)
            .ok_or_else(|| Error::Tool(format!("Invalid destination: {destination}")))?;
        Ok(self.root.join(user).join(format!("{dest}.md")))
    }
}

/// Keep names usable as a single path component.
fn sanitize_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned)
    }
}

#[async_trait]
impl WorkspaceWriter for FileWorkspaceWriter {
    async fn write(&self, user_id: &str, destination: &str, text: &str) -> Result<()> {
        let path = self.destination_path(user_id, destination)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M");
        let entry = format!("- [{}] {}\n", timestamp, text.trim());

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended {} chars to {:?}", text.len(), path);
        Ok(())
    }
}

/// In-memory workspace, used in tests and dry runs.
#[derive(Default)]
pub struct InMemoryWorkspace {
    entries: Mutex<Vec<(String, String, String)>>,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(user, destination, text)` entries written so far.
    pub fn entries(&self) -> Vec<(String, String, String)> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkspaceWriter for InMemoryWorkspace {
    async fn write(&self, user_id: &str, destination: &str, text: &str) -> Result<()> {
        self.entries.lock().unwrap().push((
            user_id.to_string(),
            destination.to_string(),
            text.to_string(),
        ));
        Ok(())
    }
}

/// Credential store reading a JSON map of `user id -> token`.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Default location: `~/.switchboard/credentials.json`.
    pub fn default_path() -> PathBuf {
        crate::config::config_dir().join("credentials.json")
    }

    /// Store a token for a user, creating the file if needed.
    pub fn save_token(&self, user_id: &str, token: &str) -> Result<()> {
        let mut tokens = self.load()?;
        tokens.insert(user_id.to_string(), token.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&tokens)?)?;
        Ok(())
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn workspace_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(user_id).cloned())
    }
}

/// In-memory credential store.
#[derive(Default)]
pub struct InMemoryCredentials {
    tokens: Mutex<HashMap<String, String>>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, user_id: &str, token: &str) -> Self {
        self.tokens
            .lock()
            .unwrap()
            .insert(user_id.to_string(), token.to_string());
        self
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentials {
    async fn workspace_token(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.lock().unwrap().get(user_id).cloned())
    }
}
