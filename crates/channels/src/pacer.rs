//! Delivery pacer: turns an output stream into paced platform messages.
//!
//! Chunks are queued as they arrive and sent no faster than one per
//! `min_interval`. Each chunk replies to the message sent before it, so a
//! turn reads as one thread. While waiting for output the pacer keeps the
//! platform's typing indicator alive.

use chatrelay_agent::OutputChunk;
use chatrelay_config::DeliveryConfig;
use chatrelay_core::channel::Channel;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::split::split_message;

/// Summary of one delivery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Chunks fully delivered.
    pub delivered: usize,
    /// Chunks dropped after a send error.
    pub failed: usize,
    /// Id of the last message sent, for further threading.
    pub last_message_id: Option<String>,
}

pub struct DeliveryPacer {
    channel: Arc<dyn Channel>,
    min_interval: Duration,
    typing_interval: Duration,
    max_message_len: usize,
}

impl DeliveryPacer {
    pub fn new(channel: Arc<dyn Channel>, config: &DeliveryConfig) -> Self {
        Self {
            channel,
            min_interval: config.min_interval(),
            typing_interval: config.typing_interval(),
            max_message_len: config.max_message_len,
        }
    }

    pub fn with_intervals(mut self, min_interval: Duration, typing_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self.typing_interval = typing_interval;
        self
    }

    /// Deliver every chunk from `output` to `chat_id`, threading replies
    /// starting from `reply_to`. Returns once the stream has closed and the
    /// queue is drained.
    pub async fn deliver(
        &self,
        chat_id: &str,
        reply_to: Option<String>,
        mut output: mpsc::Receiver<OutputChunk>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut reply_to = reply_to;
        let mut queue: VecDeque<OutputChunk> = VecDeque::new();
        let mut closed = false;
        let mut next_send = Instant::now();
        let mut next_typing = Instant::now();

        while !closed || !queue.is_empty() {
            tokio::select! {
                biased;

                chunk = output.recv(), if !closed => match chunk {
                    Some(chunk) => {
                        debug!(chat_id, kind = chunk.kind(), "Queued output chunk");
                        queue.push_back(chunk);
                    }
                    None => closed = true,
                },

                _ = sleep_until(next_send), if !queue.is_empty() => {
                    if let Some(chunk) = queue.pop_front() {
                        match self.send_chunk(chat_id, reply_to.as_deref(), &chunk).await {
                            Some(id) => {
                                report.delivered += 1;
                                reply_to = Some(id.clone());
                                report.last_message_id = Some(id);
                            }
                            None => report.failed += 1,
                        }
                    }
                    next_send = Instant::now() + self.min_interval;
                },

                _ = sleep_until(next_typing), if !closed => {
                    if let Err(e) = self.channel.send_typing(chat_id).await {
                        debug!(chat_id, error = %e, "Typing indicator failed");
                    }
                    next_typing = Instant::now() + self.typing_interval;
                },
            }
        }

        report
    }

    /// Send one chunk, split to the platform limit. All parts reply to the
    /// same message; the id of the last part is returned.
    async fn send_chunk(
        &self,
        chat_id: &str,
        reply_to: Option<&str>,
        chunk: &OutputChunk,
    ) -> Option<String> {
        let mut last = None;
        for part in split_message(&chunk.render(), self.max_message_len) {
            match self.channel.send(chat_id, &part, reply_to).await {
                Ok(sent) => last = Some(sent.message_id),
                Err(e) => {
                    warn!(
                        channel = self.channel.name(),
                        chat_id,
                        error = %e,
                        "Couldn't deliver message"
                    );
                    return None;
                }
            }
        }
        last
    }
}
