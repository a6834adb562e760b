//! Channel trait: the abstraction over chat platforms.
//!
//! A Channel connects the relay to a messaging platform (Telegram, terminal).
//! It receives messages from users and sends responses back.

use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unique identifier for a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// The channel this message belongs to
    pub channel_id: ChannelId,

    /// Sender identifier (platform-specific user ID)
    pub sender_id: String,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// The text content
    pub content: String,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// Platform id of this message, used to thread replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ChannelMessage {
    /// The slash command carried by this message, if any.
    ///
    /// Returns `(command, arguments)`. A `@botname` suffix on the command
    /// token is dropped: `/reset@my_bot` yields `("reset", "")`.
    pub fn command(&self) -> Option<(&str, &str)> {
        let rest = self.content.strip_prefix('/')?;
        let (token, args) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim()),
            None => (rest, ""),
        };
        let name = token.split('@').next().unwrap_or(token);
        if name.is_empty() {
            return None;
        }
        Some((name, args))
    }
}

/// Receipt for an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Platform id of the sent message (the last part, if it was split)
    pub message_id: String,
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, message
/// splitting and formatting.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram", "cli").
    fn name(&self) -> &str;

    /// Unique ID for this channel instance.
    fn id(&self) -> &ChannelId;

    /// Start listening for incoming messages.
    ///
    /// Returns a receiver that yields incoming messages. The channel
    /// implementation handles polling internally.
    async fn start(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError>;

    /// Send a text message to a chat, optionally as a reply.
    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<SentMessage, ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: &str) -> Result<(), ChannelError> {
        Ok(()) // No-op default
    }

    /// Send an image file.
    async fn send_photo(&self, _chat_id: &str, path: &Path) -> Result<SentMessage, ChannelError> {
        Err(ChannelError::NotConfigured(format!(
            "{} cannot send photos ({})",
            self.name(),
            path.display()
        )))
    }

    /// Check if a sender is allowed (allowlist check).
    fn is_allowed(&self, sender_id: &str) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> ChannelMessage {
        ChannelMessage {
            channel_id: ChannelId("telegram".into()),
            sender_id: "12345".into(),
            sender_name: Some("Alice".into()),
            content: content.into(),
            chat_id: "67890".into(),
            message_id: Some("7".into()),
        }
    }

    #[test]
    fn plain_text_has_no_command() {
        assert!(message("Hello bot!").command().is_none());
        assert!(message("/").command().is_none());
    }

    #[test]
    fn command_with_arguments() {
        let msg = message("/system  You are terse. ");
        assert_eq!(msg.command(), Some(("system", "You are terse.")));
    }

    #[test]
    fn command_strips_bot_mention() {
        let msg = message("/reset@relay_bot");
        assert_eq!(msg.command(), Some(("reset", "")));
    }
}
