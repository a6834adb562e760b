//! Page fetch plugin: GET a URL and return its visible text.

use crate::html;
use async_trait::async_trait;
use chatrelay_config::{PluginsConfig, TransportConfig};
use chatrelay_core::error::PluginError;
use chatrelay_core::message::ConversationId;
use chatrelay_core::plugin::{Plugin, PluginKind};
use chatrelay_providers::{RetryPolicy, TransportClient};
use reqwest::Method;
use tracing::debug;

/// Some sites refuse non-browser agents outright.
const BROWSER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36";

pub struct WebPlugin {
    policy: RetryPolicy,
    max_chars: usize,
}

impl WebPlugin {
    pub fn new(max_chars: usize, policy: RetryPolicy) -> Self {
        Self { policy, max_chars }
    }

    pub fn from_config(plugins: &PluginsConfig, transport: &TransportConfig) -> Self {
        Self::new(plugins.web_max_chars, RetryPolicy::from_config(transport))
    }
}

#[async_trait]
impl Plugin for WebPlugin {
    fn name(&self) -> &str {
        "Web"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Fetch
    }

    fn description(&self) -> &str {
        "Fetch a web page by URL and read its text."
    }

    async fn send(&self, _session: &ConversationId, query: &str) -> Result<String, PluginError> {
        let Some(url) = normalize_url(query) else {
            return Ok(String::new());
        };

        let body = TransportClient::new(url.as_str(), self.policy.clone())?
            .header("User-Agent", BROWSER_AGENT)?
            .request(Method::GET, &[], None)
            .await?;
        let page = String::from_utf8_lossy(&body);

        let text = if looks_like_html(&page) {
            html::extract_text(&page, self.max_chars)
        } else {
            html::clip(page.trim(), self.max_chars)
        };
        debug!(%url, chars = text.chars().count(), "Fetched page");
        Ok(text)
    }
}

/// The first token of the query, with `https://` added when no scheme is given.
fn normalize_url(query: &str) -> Option<String> {
    let url = query.split_whitespace().next()?;
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url.to_string())
    } else {
        Some(format!("https://{url}"))
    }
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(512).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.contains("<html") || head.contains("<body")
}
