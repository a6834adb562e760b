//! `chatrelay chat`: a relay session in the terminal.
//!
//! Messages go through the same dispatcher as Telegram, so commands like
//! `/system`, `/verbose` and `!python` work here too.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chatrelay_channels::{CliChannel, Relay};
use chatrelay_config::AppConfig;
use chatrelay_core::channel::Channel;

use super::{build_orchestrator, load_config};

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if config.require_api_key().is_err() {
        eprintln!();
        eprintln!("  ERROR: No completion API key configured!");
        eprintln!();
        eprintln!("  Set the environment variable:");
        eprintln!("    OPENAI_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let orchestrator = build_orchestrator(&config)?;
    let plugins = orchestrator.plugins().names().join(", ");
    let relay = Relay::new(orchestrator, config.delivery.clone());
    let cli = Arc::new(CliChannel::new());
    let channel: Arc<dyn Channel> = cli.clone();

    if let Some(msg) = message {
        relay.handle(&channel, cli.message(&msg)).await;
        return Ok(());
    }

    println!();
    println!("  chatrelay, interactive mode");
    println!();
    println!("  Model:     {}", config.completion.model);
    println!("  Plugins:   {plugins}");
    println!();
    println!("  Type your message and press Enter. /help lists commands.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut rx = channel.start().await.map_err(|e| format!("Channel error: {e}"))?;

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(result) = rx.recv().await {
        match result {
            Ok(chan_msg) => {
                println!();
                relay.handle(&channel, chan_msg).await;
                print!("  You > ");
                std::io::stdout().flush()?;
            }
            Err(e) => {
                eprintln!("  [Channel Error] {e}");
                break;
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
