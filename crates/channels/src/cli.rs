//! CLI channel: a local terminal session with the relay.
//!
//! Reads lines from stdin and prints replies to stdout. Used by
//! `chatrelay chat`.

use async_trait::async_trait;
use chatrelay_core::channel::{Channel, ChannelId, ChannelMessage, SentMessage};
use chatrelay_core::error::ChannelError;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Chat id of the terminal session.
pub const CLI_CHAT_ID: &str = "cli";

pub struct CliChannel {
    id: ChannelId,
    sent: AtomicU64,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            id: ChannelId("cli".into()),
            sent: AtomicU64::new(0),
        }
    }

    /// A message from the local user, as if typed at the prompt.
    pub fn message(&self, line: &str) -> ChannelMessage {
        ChannelMessage {
            channel_id: self.id.clone(),
            sender_id: "local_user".into(),
            sender_name: Some("User".into()),
            content: line.trim().to_string(),
            chat_id: CLI_CHAT_ID.into(),
            message_id: None,
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let template = self.message("");

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if is_exit(line) {
                            break;
                        }
                        let msg = ChannelMessage {
                            content: line.to_string(),
                            ..template.clone()
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(
        &self,
        _chat_id: &str,
        content: &str,
        _reply_to: Option<&str>,
    ) -> Result<SentMessage, ChannelError> {
        println!("{content}\n");
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SentMessage {
            message_id: n.to_string(),
        })
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true
    }
}
