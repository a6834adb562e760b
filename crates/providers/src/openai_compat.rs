//! OpenAI-compatible chat completions provider.
//!
//! Works with OpenAI and any endpoint exposing `/chat/completions` with the
//! same request and response shape. Requests go through the
//! [`TransportClient`], so rate-limit responses are retried before they
//! surface here.

use crate::transport::{RetryPolicy, TransportClient};
use async_trait::async_trait;
use chatrelay_config::{CompletionConfig, TransportConfig};
use chatrelay_core::error::{ProviderError, TransportError};
use chatrelay_core::message::{Message, Role};
use chatrelay_core::provider::*;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible completion provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    transport: TransportClient,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: &str,
        policy: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let transport =
            TransportClient::new(format!("{base_url}/chat/completions"), policy)?.bearer(api_key)?;

        Ok(Self {
            name: name.into(),
            base_url,
            transport,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: &str) -> Result<Self, ProviderError> {
        Self::new(
            "openai",
            "https://api.openai.com/v1",
            api_key,
            RetryPolicy::default(),
        )
    }

    /// Build a provider from the completion and transport config sections.
    pub fn from_config(
        completion: &CompletionConfig,
        transport: &TransportConfig,
    ) -> Result<Self, ProviderError> {
        let api_key = completion
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("no completion API key".into()))?;
        Self::new(
            "openai",
            &completion.base_url,
            api_key,
            RetryPolicy::from_config(transport),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    /// Map a failed exchange onto the provider error taxonomy.
    fn classify_error(err: TransportError) -> ProviderError {
        match err {
            TransportError::Status { status: 429, .. } => ProviderError::RateLimited,
            TransportError::Status {
                status: 401 | 403, ..
            } => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            TransportError::Status { status: 400, body } if is_context_overflow(&body) => {
                ProviderError::ContextLengthExceeded(body)
            }
            TransportError::Status { status, body } => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
            other => ProviderError::Transport(other),
        }
    }

    fn parse_response(body: &[u8]) -> Result<ProviderResponse, ProviderError> {
        let api_response: ApiResponse = serde_json::from_slice(body)
            .map_err(|e| ProviderError::Decode(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("No choices in response".into()))?;

        let usage = api_response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(ProviderResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            usage,
            model: api_response.model.unwrap_or_default(),
        })
    }
}

/// Whether a 400 body describes an oversized prompt.
fn is_context_overflow(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
        || lower.contains("too many tokens")
}

#[async_trait]
impl chatrelay_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
        });

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let raw = self
            .transport
            .request(Method::POST, &[], Some(&body))
            .await
            .map_err(|e| {
                let err = Self::classify_error(e);
                warn!(provider = %self.name, error = %err, "Completion request failed");
                err
            })?;

        Self::parse_response(&raw)
    }
}

// --- OpenAI API wire types (private) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}
