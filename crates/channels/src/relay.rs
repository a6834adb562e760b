//! Relay dispatcher: routes inbound chat messages to commands or the
//! orchestrator and paces the replies back out.

use std::sync::Arc;

use chatrelay_agent::{ERROR_PREFIX, INFO_PREFIX, Orchestrator, OutputChunk};
use chatrelay_config::DeliveryConfig;
use chatrelay_core::channel::{Channel, ChannelMessage};
use chatrelay_core::error::{ChannelError, StoreError};
use chatrelay_core::message::ConversationId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::{self, Command};
use crate::pacer::{DeliveryPacer, DeliveryReport};
use crate::split::split_message;

pub struct Relay {
    orchestrator: Arc<Orchestrator>,
    delivery: DeliveryConfig,
}

impl Relay {
    pub fn new(orchestrator: Arc<Orchestrator>, delivery: DeliveryConfig) -> Self {
        Self {
            orchestrator,
            delivery,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Start `channel` and handle its messages one at a time until its
    /// stream ends. A lost connection ends the run with an error.
    pub async fn run(&self, channel: Arc<dyn Channel>) -> Result<(), ChannelError> {
        let mut inbound = channel.start().await?;
        info!(channel = channel.name(), "Relay started");

        while let Some(item) = inbound.recv().await {
            match item {
                Ok(msg) => {
                    self.handle(&channel, msg).await;
                }
                Err(ChannelError::ConnectionLost(reason)) => {
                    channel.stop().await?;
                    return Err(ChannelError::ConnectionLost(reason));
                }
                Err(e) => warn!(channel = channel.name(), error = %e, "Bad inbound message"),
            }
        }

        channel.stop().await?;
        info!(channel = channel.name(), "Relay stopped");
        Ok(())
    }

    /// Handle one inbound message to completion, including delivery.
    pub async fn handle(&self, channel: &Arc<dyn Channel>, msg: ChannelMessage) -> DeliveryReport {
        if !channel.is_allowed(&msg.sender_id) {
            warn!(
                channel = channel.name(),
                sender_id = %msg.sender_id,
                "Sender is not allowed to use this bot"
            );
            return self.reply(channel, &msg, commands::UNAUTHORIZED).await;
        }

        let session = ConversationId::from(msg.chat_id.as_str());

        if let Some((name, args)) = msg.command() {
            let command = Command::parse(name);
            if command != Command::System {
                debug!(%session, ?command, "Chat command");
                let text = match self.run_command(&session, command, args).await {
                    Ok(text) => format!("{INFO_PREFIX}{text}"),
                    Err(e) => format!("{ERROR_PREFIX}{e}"),
                };
                return self.reply(channel, &msg, &text).await;
            }
        }

        debug!(%session, len = msg.content.len(), "Relaying message");
        let output = self.orchestrator.send_message(session, msg.content.clone());
        DeliveryPacer::new(Arc::clone(channel), &self.delivery)
            .deliver(&msg.chat_id, msg.message_id.clone(), output)
            .await
    }

    async fn run_command(
        &self,
        session: &ConversationId,
        command: Command,
        _args: &str,
    ) -> Result<String, StoreError> {
        let store = self.orchestrator.store();
        let text = match command {
            Command::Help => commands::HELP.to_string(),
            Command::Reset => {
                self.orchestrator.reset(session).await?;
                commands::RESET_DONE.to_string()
            }
            Command::Chats => {
                let keys = store.keys().await?;
                if keys.is_empty() {
                    "No conversations yet.".to_string()
                } else {
                    keys.iter()
                        .map(|id| format!("/chat_{id}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Chat(id) if id.is_empty() => commands::UNKNOWN_CHAT.to_string(),
            Command::Chat(id) => match store.get(&ConversationId::from(id)).await? {
                Some(conv) => serde_json::to_string(&conv.messages)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
                None => commands::UNKNOWN_CHAT.to_string(),
            },
            Command::Verbose => {
                if self.orchestrator.toggle_verbose(session).await? {
                    "Verbose mode on.".to_string()
                } else {
                    "Verbose mode off.".to_string()
                }
            }
            Command::AskFriends => self.ask_friends(session).await,
            Command::Stats => {
                let conv = store.get_or_new(session).await?;
                format!(
                    "Messages: {}\nTokens: {}\nVerbose: {}\nStarted: {} min ago",
                    conv.len(),
                    conv.total_tokens,
                    if conv.verbose { "on" } else { "off" },
                    conv.age().num_minutes()
                )
            }
            Command::Unknown(name) => {
                debug!(%session, command = %name, "Unknown command");
                commands::UNKNOWN_COMMAND.to_string()
            }
            // Routed to the orchestrator before we get here.
            Command::System => commands::UNKNOWN_COMMAND.to_string(),
        };
        Ok(text)
    }

    /// Install the plugin protocol prompt and echo it.
    async fn ask_friends(&self, session: &ConversationId) -> String {
        let Some(prompt) = commands::ask_friends_prompt(self.orchestrator.plugins()) else {
            return commands::NO_PLUGINS.to_string();
        };

        let (tx, mut rx) = mpsc::channel(4);
        self.orchestrator
            .run_turn(session, &format!("/system {prompt}"), tx)
            .await;
        let status = match rx.recv().await {
            Some(chunk @ OutputChunk::Error(_)) => return chunk.render(),
            Some(chunk) => chunk.text().to_string(),
            None => String::new(),
        };
        format!("{status}\n\n{prompt}")
    }

    /// Send a direct reply to `msg`, split to the platform limit.
    async fn reply(&self, channel: &Arc<dyn Channel>, msg: &ChannelMessage, text: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for part in split_message(text, self.delivery.max_message_len) {
            match channel
                .send(&msg.chat_id, &part, msg.message_id.as_deref())
                .await
            {
                Ok(sent) => report.last_message_id = Some(sent.message_id),
                Err(e) => {
                    warn!(channel = channel.name(), chat_id = %msg.chat_id, error = %e, "Couldn't send reply");
                    report.failed += 1;
                    return report;
                }
            }
        }
        report.delivered += 1;
        report
    }
}
