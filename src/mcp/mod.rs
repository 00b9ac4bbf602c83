//! Per-user MCP tool client.
//!
//! External-workspace tools are not known statically. Each user gets a lazily
//! opened connection to a tool-providing process; its tool list is fetched
//! once per connection and offered to the backend alongside the built-ins.

mod process;

pub use process::ChildProcessConnector;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::agent::message::ToolResult;
use crate::collaborators::CredentialStore;
use crate::locks::KeyedLocks;
use crate::tools::ToolSpec;
use crate::Result;

/// An open connection to one tool-providing process.
#[async_trait]
pub trait McpConnection: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    /// Invoke a tool. A tool that ran and reported an error is `Ok` with a
    /// failed result; `Err` means the connection itself is unusable.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult>;

    async fn close(&self) -> Result<()>;
}

/// Opens connections for users.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, user_id: &str, credentials: &dyn CredentialStore) -> Result<Arc<dyn McpConnection>>;
}

struct Client {
    connection: Arc<dyn McpConnection>,
    tools: OnceCell<Vec<ToolSpec>>,
}

/// Lazily-connected MCP clients keyed by user id.
pub struct McpClientPool {
    connector: Arc<dyn McpConnector>,
    locks: KeyedLocks,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl McpClientPool {
    pub fn new(connector: Arc<dyn McpConnector>) -> Self {
        Self {
            connector,
            locks: KeyedLocks::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, user_id: &str, credentials: &dyn CredentialStore) -> Result<Arc<Client>> {
        let _guard = self.locks.lock(user_id).await;

        if let Some(client) = self.clients.lock().await.get(user_id) {
            return Ok(client.clone());
        }

        let connection = self.connector.connect(user_id, credentials).await?;
        let client = Arc::new(Client {
            connection,
            tools: OnceCell::new(),
        });
        self.clients
            .lock()
            .await
            .insert(user_id.to_string(), client.clone());

        info!("Opened MCP connection for {}", user_id);
        Ok(client)
    }

    /// Tools offered by the user's workspace, discovered once per connection.
    pub async fn list_tools(&self, user_id: &str, credentials: &dyn CredentialStore) -> Result<Vec<ToolSpec>> {
        let client = self.client(user_id, credentials).await?;
        let listed = client
            .tools
            .get_or_try_init(|| client.connection.list_tools())
            .await;

        match listed {
            Ok(tools) => Ok(tools.clone()),
            Err(e) => {
                self.evict(user_id, &client).await;
                Err(e)
            }
        }
    }

    /// Whether the user's workspace offers a tool with this name.
    pub async fn has_tool(&self, user_id: &str, credentials: &dyn CredentialStore, name: &str) -> Result<bool> {
        Ok(self
            .list_tools(user_id, credentials)
            .await?
            .iter()
            .any(|t| t.name == name))
    }

    pub async fn call_tool(
        &self,
        user_id: &str,
        credentials: &dyn CredentialStore,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult> {
        let client = self.client(user_id, credentials).await?;
        debug!("MCP call {} for {}", name, user_id);

        match client.connection.call_tool(name, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.evict(user_id, &client).await;
                Err(e)
            }
        }
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.clients.lock().await.contains_key(user_id)
    }

    /// Close and forget the user's connection.
    pub async fn close(&self, user_id: &str) -> Result<()> {
        let client = self.clients.lock().await.remove(user_id);
        if let Some(client) = client {
            client.connection.close().await?;
            info!("Closed MCP connection for {}", user_id);
        }
        Ok(())
    }

    pub async fn close_all(&self) {
        let clients: Vec<(String, Arc<Client>)> = self.clients.lock().await.drain().collect();
        for (user_id, client) in clients {
            match client.connection.close().await {
                Ok(()) => info!("Closed MCP connection for {}", user_id),
                Err(e) => warn!("Failed to close MCP connection for {}: {}", user_id, e),
            }
        }
    }

    /// Drop a broken connection so the next call reconnects.
    async fn evict(&self, user_id: &str, client: &Arc<Client>) {
        let mut clients = self.clients.lock().await;
        if clients.get(user_id).is_some_and(|c| Arc::ptr_eq(c, client)) {
            clients.remove(user_id);
            warn!("Dropped broken MCP connection for {}", user_id);
        }
        drop(clients);
        if let Err(e) = client.connection.close().await {
            debug!("Closing broken MCP connection failed: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::testing::FakeConnector;
    use super::*;
    use crate::collaborators::InMemoryCredentials;

    fn credentials() -> InMemoryCredentials {
        InMemoryCredentials::new()
            .with_token("alice", "tok-a")
            .with_token("bob", "tok-b")
    }

    #[tokio::test]
    async fn test_lazy_connect_and_tool_cache() {
        let connector = Arc::new(FakeConnector::new());
        let pool = McpClientPool::new(connector.clone());
        let creds = credentials();

        assert!(!pool.is_connected("alice").await);
        let tools = pool.list_tools("alice", &creds).await.unwrap();
        assert_eq!(tools.len(), 2);
        pool.list_tools("alice", &creds).await.unwrap();

        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.list_calls.load(Ordering::SeqCst), 1);
        assert!(pool.is_connected("alice").await);
    }

    #[tokio::test]
    async fn test_connection_per_user() {
        let connector = Arc::new(FakeConnector::new());
        let pool = McpClientPool::new(connector.clone());
        let creds = credentials();

        pool.list_tools("alice", &creds).await.unwrap();
        pool.list_tools("bob", &creds).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_call_tool() {
        let pool = McpClientPool::new(Arc::new(FakeConnector::new()));
        let creds = credentials();

        let result = pool
            .call_tool("alice", &creds, "search_pages", json!({"query": "roadmap"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.to_text().contains("roadmap"));
        assert!(pool.has_tool("alice", &creds, "create_page").await.unwrap());
        assert!(!pool.has_tool("alice", &creds, "delete_everything").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_token_is_error() {
        let pool = McpClientPool::new(Arc::new(FakeConnector::new()));
        let result = pool.list_tools("carol", &credentials()).await;
        assert!(result.is_err());
        assert!(!pool.is_connected("carol").await);
    }

    #[tokio::test]
    async fn test_broken_connection_is_dropped() {
        let connector = Arc::new(FakeConnector::new());
        connector.break_connections();
        let pool = McpClientPool::new(connector.clone());
        let creds = credentials();

        assert!(pool.call_tool("alice", &creds, "search_pages", json!({})).await.is_err());
        assert!(!pool.is_connected("alice").await);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let connector = Arc::new(FakeConnector::new());
        let pool = McpClientPool::new(connector.clone());
        let creds = credentials();
        pool.list_tools("alice", &creds).await.unwrap();
        pool.list_tools("bob", &creds).await.unwrap();

        pool.close_all().await;
        assert!(!pool.is_connected("alice").await);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 2);
    }
}
