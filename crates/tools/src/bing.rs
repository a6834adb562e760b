//! Bing web search plugin.
//!
//! Besides ordinary web results, Bing answers arithmetic and unit
//! conversions (`computation`) and clock questions (`timeZone`), which makes
//! it the model's calculator and world clock as well as its search engine.

use async_trait::async_trait;
use chatrelay_config::{PluginsConfig, TransportConfig};
use chatrelay_core::error::PluginError;
use chatrelay_core::message::ConversationId;
use chatrelay_core::plugin::{Plugin, PluginKind};
use chatrelay_providers::{RetryPolicy, TransportClient};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

const WEB_RESULTS: usize = 5;
const NEWS_RESULTS: usize = 3;

pub struct BingPlugin {
    transport: TransportClient,
}

impl BingPlugin {
    pub fn new(endpoint: &str, key: &str, policy: RetryPolicy) -> Result<Self, PluginError> {
        let transport =
            TransportClient::new(endpoint, policy)?.header("Ocp-Apim-Subscription-Key", key)?;
        Ok(Self { transport })
    }

    pub fn from_config(
        plugins: &PluginsConfig,
        transport: &TransportConfig,
    ) -> Result<Self, PluginError> {
        let key = plugins
            .bing_key
            .as_deref()
            .ok_or_else(|| PluginError::NotConfigured("Bing needs a subscription key".into()))?;
        Self::new(
            &plugins.bing_endpoint,
            key,
            RetryPolicy::from_config(transport),
        )
    }
}

#[async_trait]
impl Plugin for BingPlugin {
    fn name(&self) -> &str {
        "Bing"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Search
    }

    fn description(&self) -> &str {
        "Web search. Also a calculator, unit converter and world clock."
    }

    async fn send(&self, _session: &ConversationId, query: &str) -> Result<String, PluginError> {
        let body = self
            .transport
            .request(Method::GET, &[("q", query)], None)
            .await?;
        let response: Value =
            serde_json::from_slice(&body).map_err(|e| PluginError::Decode {
                plugin: "Bing".into(),
                reason: e.to_string(),
            })?;
        let answer = extract(&response);
        debug!(query, chars = answer.len(), "Bing answered");
        Ok(answer)
    }
}

/// Render a search response as text: direct answers first, then one
/// `[name](url)` line per result followed by its snippet.
///
/// Missing sections are skipped; a response with none of them yields "".
pub fn extract(response: &Value) -> String {
    let mut lines = Vec::new();

    let computation = &response["computation"];
    if let (Some(expression), Some(value)) = (
        computation["expression"].as_str(),
        computation["value"].as_str(),
    ) {
        lines.push(format!("{expression} = {value}"));
    }

    let city_time = &response["timeZone"]["primaryCityTime"];
    if let (Some(location), Some(time)) = (city_time["location"].as_str(), city_time["time"].as_str())
    {
        lines.push(format!("{location}: {time}"));
    }

    push_results(&mut lines, &response["webPages"]["value"], "snippet", WEB_RESULTS);
    push_results(&mut lines, &response["news"]["value"], "description", NEWS_RESULTS);

    lines.join("\n")
}

fn push_results(lines: &mut Vec<String>, results: &Value, text_key: &str, limit: usize) {
    let Some(results) = results.as_array() else {
        return;
    };
    for result in results.iter().take(limit) {
        let (Some(name), Some(url)) = (result["name"].as_str(), result["url"].as_str()) else {
            continue;
        };
        lines.push(format!("[{name}]({url})"));
        if let Some(text) = result[text_key].as_str().filter(|t| !t.is_empty()) {
            lines.push(text.to_string());
        }
    }
}
