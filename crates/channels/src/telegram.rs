//! Telegram channel adapter.
//!
//! Long-polls the Bot API for updates and turns text messages into
//! [`ChannelMessage`]s. Outbound text goes out with the legacy Markdown
//! parse mode after [`ensure_formatting`]; if Telegram still rejects the
//! entities, the raw text is resent without formatting.

use async_trait::async_trait;
use chatrelay_config::TelegramConfig;
use chatrelay_core::channel::{Channel, ChannelId, ChannelMessage, SentMessage};
use chatrelay_core::error::ChannelError;
use std::path::Path;
use std::time::Duration;
use teloxide::{
    ApiError, RequestError,
    payloads::SendMessageSetters,
    prelude::*,
    types::{
        AllowedUpdate, ChatAction, ChatId, InputFile, Message, MessageId, ParseMode, ReplyParameters,
        UpdateKind,
    },
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::allow::Allowlist;
use crate::format::ensure_formatting;

/// Long-polling timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u32 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct TelegramChannel {
    bot: Bot,
    channel_id: ChannelId,
    allowlist: Allowlist,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramChannel {
    pub fn new(token: &str, allowlist: Allowlist) -> Self {
        Self::with_bot(Bot::new(token), allowlist)
    }

    fn with_bot(bot: Bot, allowlist: Allowlist) -> Self {
        Self {
            bot,
            channel_id: ChannelId("telegram".into()),
            allowlist,
            poller: Mutex::new(None),
        }
    }

    /// Build from config. Needs a bot token; honors `api_endpoint`.
    pub fn from_config(config: &TelegramConfig) -> Result<Self, ChannelError> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChannelError::NotConfigured("telegram.token is not set".into()))?;

        let mut bot = Bot::new(token);
        if let Some(endpoint) = config.api_endpoint.as_deref() {
            let url = endpoint.parse::<reqwest::Url>().map_err(|e| {
                ChannelError::NotConfigured(format!("invalid telegram.api_endpoint {endpoint}: {e}"))
            })?;
            bot = bot.set_api_url(url);
        }
        Ok(Self::with_bot(bot, Allowlist::from_config(config)))
    }

    /// The bot's username, as reported by `getMe`.
    pub async fn username(&self) -> Result<Option<String>, ChannelError> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
        Ok(me.username.clone())
    }

    fn delivery_error(e: RequestError) -> ChannelError {
        ChannelError::DeliveryFailed {
            channel: "telegram".into(),
            reason: e.to_string(),
        }
    }
}

fn parse_chat_id(chat_id: &str) -> Result<ChatId, ChannelError> {
    chat_id
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| ChannelError::InvalidPayload(format!("not a Telegram chat id: {chat_id}")))
}

fn reply_parameters(reply_to: Option<&str>) -> Option<ReplyParameters> {
    reply_to
        .and_then(|id| id.parse::<i32>().ok())
        .map(|id| ReplyParameters::new(MessageId(id)).allow_sending_without_reply())
}

/// Convert a Telegram message to an inbound channel message. Non-text
/// messages are skipped.
fn inbound(channel_id: &ChannelId, msg: &Message) -> Option<ChannelMessage> {
    let text = msg.text()?;
    let sender = msg.from.as_ref();
    Some(ChannelMessage {
        channel_id: channel_id.clone(),
        sender_id: sender.map(|u| u.id.0.to_string()).unwrap_or_default(),
        sender_name: sender.map(|u| u.full_name()),
        content: text.to_string(),
        chat_id: msg.chat.id.0.to_string(),
        message_id: Some(msg.id.0.to_string()),
    })
}

async fn poll_updates(
    bot: Bot,
    channel_id: ChannelId,
    tx: mpsc::Sender<Result<ChannelMessage, ChannelError>>,
) {
    let mut offset: i32 = 0;
    loop {
        let updates = match bot
            .get_updates()
            .offset(offset)
            .timeout(POLL_TIMEOUT_SECS)
            .allowed_updates(vec![AllowedUpdate::Message])
            .await
        {
            Ok(updates) => updates,
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                let _ = tx
                    .send(Err(ChannelError::ConnectionLost(
                        "another instance is polling with this token".into(),
                    )))
                    .await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Telegram polling failed, retrying");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = update.id.as_offset();
            let UpdateKind::Message(msg) = update.kind else {
                continue;
            };
            let Some(message) = inbound(&channel_id, &msg) else {
                debug!(chat_id = msg.chat.id.0, "Skipping non-text message");
                continue;
            };
            if tx.send(Ok(message)).await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        self.bot
            .delete_webhook()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(poll_updates(self.bot.clone(), self.channel_id.clone(), tx));
        if let Some(previous) = self.poller.lock().await.replace(handle) {
            previous.abort();
        }
        info!("Telegram channel polling");
        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<SentMessage, ChannelError> {
        let chat = parse_chat_id(chat_id)?;
        let reply = reply_parameters(reply_to);

        let mut formatted = self
            .bot
            .send_message(chat, ensure_formatting(content))
            .parse_mode(ParseMode::Markdown);
        if let Some(rp) = &reply {
            formatted = formatted.reply_parameters(rp.clone());
        }

        let sent = match formatted.await {
            Ok(message) => message,
            Err(e) => {
                warn!(chat_id, error = %e, "Markdown send failed, retrying as plain text");
                let mut plain = self.bot.send_message(chat, content);
                if let Some(rp) = reply {
                    plain = plain.reply_parameters(rp);
                }
                plain.await.map_err(Self::delivery_error)?
            }
        };
        Ok(SentMessage {
            message_id: sent.id.0.to_string(),
        })
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let chat = parse_chat_id(chat_id)?;
        self.bot
            .send_chat_action(chat, ChatAction::Typing)
            .await
            .map_err(Self::delivery_error)?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: &str, path: &Path) -> Result<SentMessage, ChannelError> {
        let chat = parse_chat_id(chat_id)?;
        let sent = self
            .bot
            .send_photo(chat, InputFile::file(path.to_path_buf()))
            .await
            .map_err(Self::delivery_error)?;
        Ok(SentMessage {
            message_id: sent.id.0.to_string(),
        })
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.allowlist.is_allowed(sender_id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
            info!("Telegram channel stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>) -> TelegramConfig {
        TelegramConfig {
            token: token.map(String::from),
            allowed_users: vec!["7".into()],
            ..Default::default()
        }
    }

    #[test]
    fn requires_a_token() {
        assert!(matches!(
            TelegramChannel::from_config(&config(None)),
            Err(ChannelError::NotConfigured(_))
        ));
        assert!(TelegramChannel::from_config(&config(Some(""))).is_err());
    }

    #[test]
    fn rejects_bad_api_endpoint() {
        let mut cfg = config(Some("123:abc"));
        cfg.api_endpoint = Some("not a url".into());
        assert!(matches!(
            TelegramChannel::from_config(&cfg),
            Err(ChannelError::NotConfigured(_))
        ));
    }

    #[test]
    fn name_and_allowlist() {
        let ch = TelegramChannel::from_config(&config(Some("123:abc"))).unwrap();
        assert_eq!(ch.name(), "telegram");
        assert_eq!(ch.id().0, "telegram");
        assert!(ch.is_allowed("7"));
        assert!(!ch.is_allowed("8"));
    }

    #[test]
    fn reply_ids_parse() {
        assert!(reply_parameters(Some("12")).is_some());
        assert!(reply_parameters(Some("cli")).is_none());
        assert!(reply_parameters(None).is_none());
    }

    #[tokio::test]
    async fn bad_chat_id_fails_before_any_request() {
        let ch = TelegramChannel::new("123:abc", Allowlist::default());
        let err = ch.send("not-a-chat", "hi", None).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidPayload(_)));
    }

    #[test]
    fn text_message_becomes_inbound() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "message_id": 5,
            "date": 1_700_000_000,
            "chat": { "id": 42, "type": "private", "first_name": "Ada" },
            "from": { "id": 7, "is_bot": false, "first_name": "Ada", "last_name": "Lovelace" },
            "text": "/reset"
        }))
        .unwrap();

        let inbound = inbound(&ChannelId("telegram".into()), &msg).unwrap();
        assert_eq!(inbound.chat_id, "42");
        assert_eq!(inbound.sender_id, "7");
        assert_eq!(inbound.sender_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(inbound.message_id.as_deref(), Some("5"));
        assert_eq!(inbound.command(), Some(("reset", "")));
    }
}
