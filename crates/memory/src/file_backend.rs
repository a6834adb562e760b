//! File-backed store: conversations persisted as JSON lines.
//!
//! Each line is one JSON-encoded `Conversation`. The whole file is loaded on
//! creation and rewritten on every mutation.
//!
//! Default location: `~/.chatrelay/conversations.jsonl`

use async_trait::async_trait;
use chatrelay_core::error::StoreError;
use chatrelay_core::message::{Conversation, ConversationId};
use chatrelay_core::store::ConversationStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct FileStore {
    path: PathBuf,
    conversations: Arc<RwLock<BTreeMap<ConversationId, Conversation>>>,
}

impl FileStore {
    /// Open the store at `path`, loading any conversations already there.
    /// A missing file starts empty; it is created on the first write.
    pub fn new(path: PathBuf) -> Self {
        let conversations = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = conversations.len(), "Conversation file loaded");
        Self {
            path,
            conversations: Arc::new(RwLock::new(conversations)),
        }
    }

    /// Default path: `~/.chatrelay/conversations.jsonl`
    pub fn default_path() -> PathBuf {
        chatrelay_config::AppConfig::config_dir().join("conversations.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<ConversationId, Conversation> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return BTreeMap::new();
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Conversation>(line) {
                Ok(conv) => Some((conv.id.clone(), conv)),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted conversation line");
                    None
                }
            })
            .collect()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let conversations = self.conversations.read().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create store directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for conv in conversations.values() {
            let line = serde_json::to_string(conv)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, content)
            .map_err(|e| StoreError::Storage(format!("Failed to write store file: {e}")))
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn put(&self, conversation: Conversation) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
        self.flush().await
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let removed = self.conversations.write().await.remove(id).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<ConversationId>, StoreError> {
        Ok(self.conversations.read().await.keys().cloned().collect())
    }
}
