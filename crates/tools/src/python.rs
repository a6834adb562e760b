//! Python code execution plugin.
//!
//! Each session gets its own interpreter, so variables defined in one chat
//! are invisible to every other chat. The interpreter lives until the
//! session is reset.

use crate::bridge::SessionBridges;
use async_trait::async_trait;
use chatrelay_config::PluginsConfig;
use chatrelay_core::error::PluginError;
use chatrelay_core::message::ConversationId;
use chatrelay_core::plugin::{Plugin, PluginKind};
use tracing::info;

pub struct PythonPlugin {
    bridges: SessionBridges,
}

impl PythonPlugin {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            bridges: SessionBridges::new(program, args),
        }
    }

    pub fn from_config(plugins: &PluginsConfig) -> Self {
        Self::new(plugins.python_path.clone(), plugins.python_args.clone())
    }

    /// Number of sessions with a live interpreter.
    pub async fn live_sessions(&self) -> usize {
        self.bridges.len().await
    }
}

#[async_trait]
impl Plugin for PythonPlugin {
    fn name(&self) -> &str {
        "Python"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Code
    }

    fn description(&self) -> &str {
        "Run Python code in a persistent per-chat interpreter."
    }

    async fn send(&self, session: &ConversationId, query: &str) -> Result<String, PluginError> {
        Ok(self.bridges.send(session, query).await?)
    }

    async fn end_session(&self, session: &ConversationId) {
        if self.bridges.release(session).await {
            info!(%session, "Python interpreter released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_interpreters_are_released() {
        // `cat` stands in for the interpreter: it echoes each frame.
        let python = PythonPlugin::new("cat", vec![]);
        let a = ConversationId::from("a");
        let b = ConversationId::from("b");

        assert_eq!(python.send(&a, "1 + 1").await.unwrap(), "1 + 1");
        assert_eq!(python.send(&b, "2 + 2").await.unwrap(), "2 + 2");
        assert_eq!(python.live_sessions().await, 2);

        python.end_session(&a).await;
        assert_eq!(python.live_sessions().await, 1);
        python.end_session(&a).await;
        assert_eq!(python.live_sessions().await, 1);
    }

    #[tokio::test]
    async fn missing_interpreter_is_bridge_error() {
        let python = PythonPlugin::new("/nonexistent/python", vec![]);
        let err = python
            .send(&ConversationId::from("a"), "print(1)")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Bridge(_)));
    }
}
