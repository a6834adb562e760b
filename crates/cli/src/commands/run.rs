//! `chatrelay run`: the Telegram relay.

use std::path::Path;
use std::sync::Arc;

use chatrelay_channels::{Relay, TelegramChannel};
use chatrelay_core::channel::Channel;
use tracing::info;

use super::{build_orchestrator, load_config};

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    config.validate_for_telegram()?;

    let telegram = TelegramChannel::from_config(&config.telegram)?;
    let username = telegram.username().await?.unwrap_or_default();
    let orchestrator = build_orchestrator(&config)?;
    let relay = Relay::new(orchestrator, config.delivery.clone());

    info!("Started Telegram bot! Message @{username} to start.");

    let channel: Arc<dyn Channel> = Arc::new(telegram);
    tokio::select! {
        result = relay.run(Arc::clone(&channel)) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            channel.stop().await?;
        }
    }

    Ok(())
}
