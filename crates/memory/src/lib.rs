//! Conversation store backends for chatrelay.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;

use chatrelay_config::StoreConfig;
use chatrelay_core::store::ConversationStore;
use std::sync::Arc;

/// Pick the backend the configuration asks for: a file when a path is set,
/// otherwise memory.
pub fn from_config(config: &StoreConfig) -> Arc<dyn ConversationStore> {
    match &config.path {
        Some(path) => Arc::new(FileStore::new(path.clone())),
        None => Arc::new(InMemoryStore::new()),
    }
}
