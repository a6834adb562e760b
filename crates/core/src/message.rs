//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the relay:
//! a chat sends text → the store appends it to the session's [`Conversation`] →
//! the orchestrator ships the message list to the completion API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session key. One per chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message author, as understood by the completion API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation
    System,
    /// The chat user
    User,
    /// The model, or a plugin answer fed back on its behalf
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// The message history and metadata for one chat.
///
/// Messages are kept in chronological order. The only operations that
/// remove or rewrite entries are [`evict_assistant_messages`](Self::evict_assistant_messages),
/// [`drop_oldest_non_system`](Self::drop_oldest_non_system) and
/// [`replace_message`](Self::replace_message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,

    pub messages: Vec<Message>,

    /// Prompt + completion tokens of the most recent exchange, as reported by
    /// the completion API. Advisory: not recomputed when messages change.
    #[serde(default)]
    pub total_tokens: u32,

    /// Emit diagnostics (token counts, raw plugin answers) to the chat.
    #[serde(default)]
    pub verbose: bool,

    pub started_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a fresh, empty conversation for a session.
    pub fn new(id: impl Into<ConversationId>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            total_tokens: 0,
            verbose: false,
            started_at: Utc::now(),
        }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Content of the earliest system message, if any.
    pub fn first_system(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Remove up to `max` assistant messages, scanning from the oldest.
    ///
    /// The last `protected_tail` positions are never touched. Returns the
    /// number of messages removed.
    pub fn evict_assistant_messages(&mut self, max: usize, protected_tail: usize) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while removed < max && i + protected_tail < self.messages.len() {
            if self.messages[i].role == Role::Assistant {
                self.messages.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Remove the oldest message that is not a system prompt.
    pub fn drop_oldest_non_system(&mut self) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.role != Role::System)?;
        Some(self.messages.remove(index))
    }

    /// Swap the message at `index` for `message`, returning the old one.
    pub fn replace_message(&mut self, index: usize, message: Message) -> Option<Message> {
        let slot = self.messages.get_mut(index)?;
        Some(std::mem::replace(slot, message))
    }

    /// Record the token usage of the latest exchange.
    pub fn record_usage(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        self.total_tokens = prompt_tokens + completion_tokens;
    }

    /// How long ago this conversation was started.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation_with(roles: &[Role]) -> Conversation {
        let mut conv = Conversation::new("test");
        for (i, role) in roles.iter().enumerate() {
            conv.push(Message {
                role: *role,
                content: format!("m{i}"),
            });
        }
        conv
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, bot!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, bot!");
    }

    #[test]
    fn message_serializes_as_api_shape() {
        let json = serde_json::to_value(Message::system("be brief")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be brief"}));
    }

    #[test]
    fn conversation_id_from_chat_id() {
        let id = ConversationId::from(-100123_i64);
        assert_eq!(id.as_str(), "-100123");
        assert_eq!(id.to_string(), "-100123");
    }

    #[test]
    fn first_system_message() {
        let mut conv = conversation_with(&[Role::User, Role::Assistant]);
        assert!(conv.first_system().is_none());
        conv.push(Message::system("rules"));
        assert_eq!(conv.first_system(), Some("rules"));
    }

    #[test]
    fn eviction_removes_at_most_max_assistant_messages() {
        use Role::*;
        let mut conv = conversation_with(&[
            System, User, Assistant, User, Assistant, User, Assistant, User, Assistant, User,
            Assistant, User,
        ]);
        let removed = conv.evict_assistant_messages(2, 6);
        assert_eq!(removed, 2);
        assert_eq!(conv.len(), 10);
        let contents: Vec<_> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["m0", "m1", "m3", "m5", "m6", "m7", "m8", "m9", "m10", "m11"]
        );
    }

    #[test]
    fn eviction_never_touches_protected_tail() {
        use Role::*;
        let mut conv = conversation_with(&[User, Assistant, User, Assistant, User, Assistant]);
        assert_eq!(conv.evict_assistant_messages(2, 6), 0);
        assert_eq!(conv.len(), 6);

        let mut conv = conversation_with(&[User, User, Assistant, User, Assistant, User, Assistant]);
        // Only index 0 is outside the tail, and it is a user message.
        assert_eq!(conv.evict_assistant_messages(2, 6), 0);
    }

    #[test]
    fn drop_oldest_skips_system_prompts() {
        use Role::*;
        let mut conv = conversation_with(&[System, System, User, Assistant]);
        let dropped = conv.drop_oldest_non_system().unwrap();
        assert_eq!(dropped.content, "m2");
        assert_eq!(conv.len(), 3);

        let mut only_system = conversation_with(&[System]);
        assert!(only_system.drop_oldest_non_system().is_none());
        assert_eq!(only_system.len(), 1);
    }

    #[test]
    fn replace_message_keeps_order() {
        let mut conv = conversation_with(&[Role::User, Role::Assistant, Role::User]);
        let old = conv.replace_message(1, Message::assistant("found")).unwrap();
        assert_eq!(old.content, "m1");
        assert_eq!(conv.messages[1].content, "found");
        assert!(conv.replace_message(7, Message::user("x")).is_none());
    }

    #[test]
    fn usage_is_last_exchange_only() {
        let mut conv = Conversation::new("s");
        conv.record_usage(100, 20);
        conv.record_usage(150, 30);
        assert_eq!(conv.total_tokens, 180);
    }

    #[test]
    fn conversation_serialization_roundtrip() {
        let mut conv = Conversation::new("42");
        conv.verbose = true;
        conv.push(Message::user("hi"));
        let json = serde_json::to_string(&conv).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, conv.id);
        assert_eq!(back.messages, conv.messages);
        assert!(back.verbose);
    }
}
