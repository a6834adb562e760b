//! Plugin trait: auxiliary services the model can consult mid-turn.
//!
//! A plugin turns a text query into plain text: a web search, a knowledge
//! engine lookup, a page fetch, or a code execution. Plugins are registered in
//! the [`PluginRegistry`] and dispatched by name when the model emits a
//! directive, or when the user invokes one directly with `!<plugin> <query>`.

use crate::error::PluginError;
use crate::message::ConversationId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What shape of answer a plugin produces. Drives snapshot rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Web search: answers are link lines plus snippets
    Search,
    /// Computed facts and knowledge pods
    Knowledge,
    /// Visible text of a fetched page
    Fetch,
    /// Output of executed code
    Code,
}

/// The core Plugin trait.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The name the model and users address this plugin by (e.g., "Bing").
    fn name(&self) -> &str;

    fn kind(&self) -> PluginKind;

    /// One-line description, used in help texts and prompts.
    fn description(&self) -> &str;

    /// Answer a query.
    ///
    /// An answer that cannot be extracted from the service response is an
    /// empty string, not an error.
    async fn send(&self, session: &ConversationId, query: &str) -> Result<String, PluginError>;

    /// Release any state held for a session.
    async fn end_session(&self, _session: &ConversationId) {}
}

/// A registry of available plugins, looked up case-insensitively.
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Register a plugin. Replaces any existing plugin with the same name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let key = plugin.name().to_lowercase();
        self.plugins.insert(key, plugin);
    }

    /// Get a plugin by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(&name.to_lowercase())
    }

    /// Tell every plugin a session has ended.
    pub async fn end_session(&self, session: &ConversationId) {
        for plugin in self.plugins.values() {
            plugin.end_session(session).await;
        }
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.values().map(|p| p.name()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
