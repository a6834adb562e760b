//! Chat channels for chatrelay and the machinery between them and the
//! orchestrator.
//!
//! - **Telegram**: Bot API long polling (teloxide)
//! - **CLI**: local terminal session (stdin/stdout)
//! - **Pacer**: paced, threaded delivery of a turn's output stream
//! - **Relay**: allow-list, chat commands, and routing to the orchestrator

pub mod allow;
pub mod cli;
pub mod commands;
pub mod format;
pub mod pacer;
pub mod relay;
pub mod split;
pub mod telegram;

pub use allow::Allowlist;
pub use cli::{CLI_CHAT_ID, CliChannel};
pub use commands::Command;
pub use format::ensure_formatting;
pub use pacer::{DeliveryPacer, DeliveryReport};
pub use relay::Relay;
pub use split::split_message;
pub use telegram::TelegramChannel;
