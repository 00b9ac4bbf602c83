//! Persisted user → browser session index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::Result;

/// Where the current session id for each user is recorded.
///
/// An entry may outlive the service's in-memory context (after a restart), so
/// callers must check it is alive before trusting it.
#[async_trait]
pub trait SessionIndex: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<String>>;
    async fn put(&self, user_id: &str, session_id: &str) -> Result<()>;
    async fn delete(&self, user_id: &str) -> Result<()>;
}

/// Index kept in process memory.
#[derive(Default)]
pub struct InMemorySessionIndex {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemorySessionIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionIndex for InMemorySessionIndex {
    async fn get(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, session_id: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(user_id.to_string(), session_id.to_string());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.entries.lock().await.remove(user_id);
        Ok(())
    }
}

/// Index stored as a JSON map in a file, so it survives restarts.
pub struct FileSessionIndex {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionIndex {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

#[async_trait]
impl SessionIndex for FileSessionIndex {
    async fn get(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, session_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load()?;
        entries.insert(user_id.to_string(), session_id.to_string());
        self.store(&entries)
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load()?;
        if entries.remove(user_id).is_some() {
            self.store(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_index_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("sessions.json");

        let index = FileSessionIndex::new(&path);
        assert_eq!(index.get("alice").await.unwrap(), None);
        index.put("alice", "s-1").await.unwrap();
        index.put("bob", "s-2").await.unwrap();

        let reopened = FileSessionIndex::new(&path);
        assert_eq!(reopened.get("alice").await.unwrap().as_deref(), Some("s-1"));

        reopened.delete("alice").await.unwrap();
        assert_eq!(index.get("alice").await.unwrap(), None);
        assert_eq!(index.get("bob").await.unwrap().as_deref(), Some("s-2"));
    }

    #[tokio::test]
    async fn test_in_memory_index() {
        let index = InMemorySessionIndex::new();
        index.put("alice", "s-1").await.unwrap();
        index.put("alice", "s-2").await.unwrap();
        assert_eq!(index.get("alice").await.unwrap().as_deref(), Some("s-2"));
        index.delete("alice").await.unwrap();
        assert_eq!(index.get("alice").await.unwrap(), None);
    }
}
