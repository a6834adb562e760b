//! Plugin adapters for chatrelay.
//!
//! Plugins let the model consult the outside world mid-turn: search the web
//! (Bing), query a knowledge engine (Wolfram), read a page (Web) or run code
//! (Python). The code plugin talks to a long-lived interpreter through the
//! ETX-framed [`bridge`].

pub mod bing;
pub mod bridge;
pub mod html;
pub mod python;
pub mod web;
pub mod wolfram;

use chatrelay_config::AppConfig;
use chatrelay_core::error::PluginError;
use chatrelay_core::plugin::PluginRegistry;
use std::sync::Arc;
use tracing::info;

pub use bridge::{ProcessBridge, SessionBridges};

/// Build the registry of plugins the configuration enables.
///
/// Web and Python need no credentials and are always present; Bing and
/// Wolfram are registered only when their keys are set.
pub fn default_registry(config: &AppConfig) -> Result<PluginRegistry, PluginError> {
    let plugins = &config.plugins;
    let transport = &config.transport;
    let mut registry = PluginRegistry::new();

    if plugins.bing_key.is_some() {
        registry.register(Arc::new(bing::BingPlugin::from_config(plugins, transport)?));
    } else {
        info!("Bing plugin disabled: no subscription key");
    }
    if plugins.wolfram_app_id.is_some() {
        registry.register(Arc::new(wolfram::WolframPlugin::from_config(
            plugins, transport,
        )?));
    } else {
        info!("Wolfram plugin disabled: no app id");
    }
    registry.register(Arc::new(web::WebPlugin::from_config(plugins, transport)));
    registry.register(Arc::new(python::PythonPlugin::from_config(plugins)));

    info!(plugins = ?registry.names(), "Plugins registered");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyless_config_has_web_and_python() {
        let registry = default_registry(&AppConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["Python", "Web"]);
    }

    #[test]
    fn keys_enable_search_and_knowledge() {
        let mut config = AppConfig::default();
        config.plugins.bing_key = Some("k".into());
        config.plugins.wolfram_app_id = Some("a".into());
        let registry = default_registry(&config).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.get("BING").is_some());
        assert!(registry.get("wolfram").is_some());
    }
}
