//! Conversation store trait: where session state lives.
//!
//! The orchestrator only talks to this interface, so the in-memory map can be
//! swapped for a persistent backend without touching the completion loop.

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId};
use async_trait::async_trait;

/// Storage for per-session conversations, keyed by session.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Name of this backend (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Fetch a conversation by session key.
    async fn get(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError>;

    /// Insert or replace a conversation.
    async fn put(&self, conversation: Conversation) -> Result<(), StoreError>;

    /// Delete a conversation. Returns whether it existed.
    async fn delete(&self, id: &ConversationId) -> Result<bool, StoreError>;

    /// All stored session keys.
    async fn keys(&self) -> Result<Vec<ConversationId>, StoreError>;

    /// Fetch a conversation, creating (but not storing) a fresh one if absent.
    async fn get_or_new(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        Ok(self
            .get(id)
            .await?
            .unwrap_or_else(|| Conversation::new(id.clone())))
    }
}
