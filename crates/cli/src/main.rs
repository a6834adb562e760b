//! chatrelay CLI: the main entry point.
//!
//! Commands:
//! - `run`   : start the Telegram relay
//! - `chat`  : talk to the relay from the terminal
//! - `check` : validate configuration and print a summary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "chatrelay: relay chats between Telegram and an LLM, with plugins",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.chatrelay/config.toml)
    #[arg(short, long, global = true, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Telegram relay
    Run,

    /// Chat with the relay in the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Load and validate the configuration
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run => commands::run::run(config_path).await?,
        Commands::Chat { message } => commands::chat::run(config_path, message).await?,
        Commands::Check => commands::check::run(config_path).await?,
    }

    Ok(())
}
