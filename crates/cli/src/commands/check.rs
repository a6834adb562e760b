//! `chatrelay check`: validate configuration and print what would run.

use std::path::Path;

use chatrelay_config::AppConfig;

use super::load_config;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    let plugins = chatrelay_tools::default_registry(&config)?;
    let store = chatrelay_memory::from_config(&config.store);

    println!();
    println!("   Model:      {}", config.completion.model);
    println!("   Endpoint:   {}", config.completion.base_url);
    println!(
        "   Context:    {} tokens (evict above {})",
        config.completion.context_limit,
        config.high_water_mark()
    );
    println!("   Plugins:    {}", plugins.names().join(", "));
    println!("   Max rounds: {}", config.orchestrator.max_plugin_rounds);
    println!("   Store:      {}", store.name());
    println!(
        "   Delivery:   one message per {}s, split at {} chars",
        config.delivery.edit_wait_seconds, config.delivery.max_message_len
    );
    println!(
        "   Allowed:    {}",
        if config.telegram.allowed_users.is_empty() || config.telegram.allow_other_users {
            "everyone".to_string()
        } else {
            config.telegram.allowed_users.join(", ")
        }
    );

    Ok(())
}

fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.telegram.token.is_none() {
        warnings.push("No Telegram token set (TELEGRAM_TOKEN); `chatrelay run` will refuse to start");
    }
    if config.completion.api_key.is_none() {
        warnings.push("No completion API key set (OPENAI_KEY)");
    }
    if config.plugins.bing_key.is_none() {
        warnings.push("Bing plugin disabled (AZURE_KEY not set)");
    }
    if config.plugins.wolfram_app_id.is_none() {
        warnings.push("Wolfram plugin disabled (WOLFRAM_APPID not set)");
    }
    warnings
}
