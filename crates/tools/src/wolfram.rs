//! Wolfram|Alpha knowledge plugin (full results API, JSON output).

use async_trait::async_trait;
use chatrelay_config::{PluginsConfig, TransportConfig};
use chatrelay_core::error::PluginError;
use chatrelay_core::message::ConversationId;
use chatrelay_core::plugin::{Plugin, PluginKind};
use chatrelay_providers::{RetryPolicy, TransportClient};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

pub struct WolframPlugin {
    transport: TransportClient,
    app_id: String,
}

impl WolframPlugin {
    pub fn new(endpoint: &str, app_id: &str, policy: RetryPolicy) -> Result<Self, PluginError> {
        Ok(Self {
            transport: TransportClient::new(endpoint, policy)?,
            app_id: app_id.to_string(),
        })
    }

    pub fn from_config(
        plugins: &PluginsConfig,
        transport: &TransportConfig,
    ) -> Result<Self, PluginError> {
        let app_id = plugins
            .wolfram_app_id
            .as_deref()
            .ok_or_else(|| PluginError::NotConfigured("Wolfram needs an app id".into()))?;
        Self::new(
            &plugins.wolfram_endpoint,
            app_id,
            RetryPolicy::from_config(transport),
        )
    }
}

#[async_trait]
impl Plugin for WolframPlugin {
    fn name(&self) -> &str {
        "Wolfram"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Knowledge
    }

    fn description(&self) -> &str {
        "Reliable data and scientific computation."
    }

    async fn send(&self, _session: &ConversationId, query: &str) -> Result<String, PluginError> {
        let params = [
            ("input", query),
            ("format", "plaintext"),
            ("output", "JSON"),
            ("appid", self.app_id.as_str()),
        ];
        let body = self.transport.request(Method::GET, &params, None).await?;
        let response: Value =
            serde_json::from_slice(&body).map_err(|e| PluginError::Decode {
                plugin: "Wolfram".into(),
                reason: e.to_string(),
            })?;
        let answer = extract(&response);
        debug!(query, pods = answer.lines().count(), "Wolfram answered");
        Ok(answer)
    }
}

/// Render the result pods as `title: plaintext` lines.
///
/// Unsuccessful queries and pods without plaintext contribute nothing.
pub fn extract(response: &Value) -> String {
    let result = &response["queryresult"];
    if result["success"].as_bool() == Some(false) {
        return String::new();
    }
    let Some(pods) = result["pods"].as_array() else {
        return String::new();
    };

    pods.iter()
        .filter_map(|pod| {
            let title = pod["title"].as_str().unwrap_or_default();
            let text = pod["subpods"]
                .as_array()?
                .iter()
                .filter_map(|sub| sub["plaintext"].as_str())
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join("; ");
            if text.is_empty() {
                return None;
            }
            Some(if title.is_empty() {
                text
            } else {
                format!("{title}: {text}")
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}
