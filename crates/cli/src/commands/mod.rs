//! Subcommand implementations and the wiring they share.

pub mod chat;
pub mod check;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use chatrelay_agent::{Orchestrator, OrchestratorSettings};
use chatrelay_config::{AppConfig, ConfigError};
use chatrelay_providers::OpenAiCompatProvider;
use tracing::info;

/// Load config from `path`, or the default location, with environment
/// overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}

/// Provider, plugins and store wired into an orchestrator.
pub fn build_orchestrator(config: &AppConfig) -> Result<Arc<Orchestrator>, Box<dyn std::error::Error>> {
    let provider = OpenAiCompatProvider::from_config(&config.completion, &config.transport)?;
    let plugins = chatrelay_tools::default_registry(config)?;
    let store = chatrelay_memory::from_config(&config.store);

    info!(
        model = %config.completion.model,
        base_url = provider.base_url(),
        store = store.name(),
        "Orchestrator ready"
    );

    let orchestrator = Orchestrator::new(Arc::new(provider), Arc::new(plugins), store)
        .with_settings(OrchestratorSettings::from_config(config));
    Ok(Arc::new(orchestrator))
}
