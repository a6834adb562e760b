//! In-memory store (the default): conversations live as long as the process.

use async_trait::async_trait;
use chatrelay_core::error::StoreError;
use chatrelay_core::message::{Conversation, ConversationId};
use chatrelay_core::store::ConversationStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Conversations keyed by session in a shared map.
pub struct InMemoryStore {
    conversations: Arc<RwLock<HashMap<ConversationId, Conversation>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn put(&self, conversation: Conversation) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, StoreError> {
        Ok(self.conversations.write().await.remove(id).is_some())
    }

    async fn keys(&self) -> Result<Vec<ConversationId>, StoreError> {
        let mut keys: Vec<_> = self.conversations.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
