//! Transport client: one HTTP request, retried on rate limiting.
//!
//! `connect()` resolves once a success status arrives and hands back a
//! receiver that yields the whole response body exactly once, then closes.
//! Status 429 and 400 are retried with a randomized backoff; a connection
//! failure is returned immediately.

use chatrelay_config::TransportConfig;
use chatrelay_core::error::TransportError;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("chatrelay/", env!("CARGO_PKG_VERSION"));

/// Receiver for a single response body.
pub type BodyReceiver = mpsc::Receiver<Result<Vec<u8>, TransportError>>;

/// How often and how patiently to retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_min: Duration::from_millis(config.backoff_min_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms.max(config.backoff_min_ms)),
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_min: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    /// A random delay in `[backoff_min, backoff_max]`.
    pub fn backoff(&self) -> Duration {
        let min = self.backoff_min.as_millis() as u64;
        let max = (self.backoff_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::BAD_REQUEST
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

/// An HTTP client bound to one endpoint, with fixed headers.
#[derive(Debug, Clone)]
pub struct TransportClient {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    policy: RetryPolicy,
}

impl TransportClient {
    /// Create a client for `url`.
    pub fn new(url: impl Into<String>, policy: RetryPolicy) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, url, policy))
    }

    /// Create a client for `url` sharing an existing connection pool.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            url: url.into(),
            headers: HeaderMap::new(),
            policy,
        }
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, TransportError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Request(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Request(format!("Invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Add an `Authorization: Bearer` header.
    pub fn bearer(self, token: &str) -> Result<Self, TransportError> {
        self.header("Authorization", &format!("Bearer {token}"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue the request and return a receiver for its body.
    ///
    /// The body is read by a spawned task and sent once over a
    /// single-slot channel, which then closes.
    pub async fn connect(
        &self,
        method: Method,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<BodyReceiver, TransportError> {
        let response = self.send_with_retry(method, &self.url, query, body).await?;

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let body = response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| TransportError::Body(e.to_string()));
            let _ = tx.send(body).await;
        });

        Ok(rx)
    }

    /// `connect()` and wait for the body.
    pub async fn request(
        &self,
        method: Method,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.connect(method, query, body).await?;
        rx.recv()
            .await
            .unwrap_or_else(|| Err(TransportError::Body("response stream closed".into())))
    }

    /// GET an arbitrary URL with this client's headers and retry policy,
    /// returning the body as text.
    pub async fn fetch(&self, url: &str) -> Result<String, TransportError> {
        let response = self.send_with_retry(Method::GET, url, &[], None).await?;
        response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))
    }

    async fn send_with_retry(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(self.headers.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(%method, url, attempt, "Sending HTTP request");
            let response = request
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if RetryPolicy::is_retryable(status) && attempt < self.policy.max_attempts {
                let delay = self.policy.backoff();
                warn!(
                    url,
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Request rejected, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
    }
}
