//! # chatrelay core
//!
//! Domain types, traits, and error definitions for the chatrelay LLM chat relay.
//! This crate has **no transport dependencies**: it defines the conversation
//! model and the seams (completion provider, chat channel, plugin,
//! conversation store) that the other crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: sessions, messages and the per-chat [`Conversation`]
//! - [`provider`]: the completion API seam
//! - [`channel`]: the chat platform seam
//! - [`plugin`]: plugin adapters and the [`PluginRegistry`]
//! - [`store`]: the [`ConversationStore`] storage interface

pub mod channel;
pub mod error;
pub mod message;
pub mod plugin;
pub mod provider;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, ChannelId, ChannelMessage, SentMessage};
pub use error::{Error, Result};
pub use message::{Conversation, ConversationId, Message, Role};
pub use plugin::{Plugin, PluginKind, PluginRegistry};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use store::ConversationStore;
