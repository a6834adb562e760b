//! Configuration loading, validation, and management for chatrelay.
//!
//! Loads configuration from `~/.chatrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.chatrelay/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion API settings
    #[serde(default)]
    pub completion: CompletionConfig,

    /// HTTP retry policy shared by the completion provider and plugins
    #[serde(default)]
    pub transport: TransportConfig,

    /// Completion loop tuning
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Outbound pacing
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Telegram bot settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Plugin credentials and endpoints
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Conversation persistence
    #[serde(default)]
    pub store: StoreConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Context window of the model, in tokens
    #[serde(default = "default_context_limit")]
    pub context_limit: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_context_limit() -> u32 {
    8192
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            context_limit: default_context_limit(),
        }
    }
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("context_limit", &self.context_limit)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_min_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    4000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Fraction of the context limit above which old replies are evicted
    #[serde(default = "default_high_water_ratio")]
    pub high_water_ratio: f32,

    #[serde(default = "default_max_evictions")]
    pub max_evictions: usize,

    /// Number of trailing messages eviction never touches
    #[serde(default = "default_protected_tail")]
    pub protected_tail: usize,

    #[serde(default = "default_overflow_retries")]
    pub overflow_retries: u32,

    /// Below this many messages a 400 is not treated as a context overflow
    #[serde(default = "default_overflow_min_messages")]
    pub overflow_min_messages: usize,

    #[serde(default = "default_overflow_retry_delay_ms")]
    pub overflow_retry_delay_ms: u64,

    /// Plugin calls allowed per user message
    #[serde(default = "default_max_plugin_rounds")]
    pub max_plugin_rounds: u32,

    /// Minimum time between the start of a plugin query and the next completion
    #[serde(default = "default_plugin_spacing_ms")]
    pub plugin_spacing_ms: u64,

    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: usize,

    #[serde(default = "default_snapshot_line_limit")]
    pub snapshot_line_limit: usize,

    #[serde(default = "default_snapshot_edge_lines")]
    pub snapshot_head_lines: usize,

    #[serde(default = "default_snapshot_edge_lines")]
    pub snapshot_tail_lines: usize,
}

fn default_high_water_ratio() -> f32 {
    0.9
}
fn default_max_evictions() -> usize {
    2
}
fn default_protected_tail() -> usize {
    6
}
fn default_overflow_retries() -> u32 {
    2
}
fn default_overflow_min_messages() -> usize {
    4
}
fn default_overflow_retry_delay_ms() -> u64 {
    1000
}
fn default_max_plugin_rounds() -> u32 {
    8
}
fn default_plugin_spacing_ms() -> u64 {
    1000
}
fn default_snapshot_threshold() -> usize {
    720
}
fn default_snapshot_line_limit() -> usize {
    120
}
fn default_snapshot_edge_lines() -> usize {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            high_water_ratio: default_high_water_ratio(),
            max_evictions: default_max_evictions(),
            protected_tail: default_protected_tail(),
            overflow_retries: default_overflow_retries(),
            overflow_min_messages: default_overflow_min_messages(),
            overflow_retry_delay_ms: default_overflow_retry_delay_ms(),
            max_plugin_rounds: default_max_plugin_rounds(),
            plugin_spacing_ms: default_plugin_spacing_ms(),
            snapshot_threshold: default_snapshot_threshold(),
            snapshot_line_limit: default_snapshot_line_limit(),
            snapshot_head_lines: default_snapshot_edge_lines(),
            snapshot_tail_lines: default_snapshot_edge_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Minimum wait between two outbound messages
    #[serde(default = "default_edit_wait_seconds")]
    pub edit_wait_seconds: u64,

    #[serde(default = "default_typing_interval_secs")]
    pub typing_interval_secs: u64,

    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_edit_wait_seconds() -> u64 {
    1
}
fn default_typing_interval_secs() -> u64 {
    10
}
fn default_max_message_len() -> usize {
    4096
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            edit_wait_seconds: default_edit_wait_seconds(),
            typing_interval_secs: default_typing_interval_secs(),
            max_message_len: default_max_message_len(),
        }
    }
}

impl DeliveryConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.edit_wait_seconds)
    }

    pub fn typing_interval(&self) -> Duration {
        Duration::from_secs(self.typing_interval_secs)
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Sender ids allowed to talk to the bot. Empty = everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Let senders outside `allowed_users` through anyway
    #[serde(default)]
    pub allow_other_users: bool,

    /// Alternative Bot API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &redact(&self.token))
            .field("allowed_users", &self.allowed_users)
            .field("allow_other_users", &self.allow_other_users)
            .field("api_endpoint", &self.api_endpoint)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bing_key: Option<String>,

    #[serde(default = "default_bing_endpoint")]
    pub bing_endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wolfram_app_id: Option<String>,

    #[serde(default = "default_wolfram_endpoint")]
    pub wolfram_endpoint: String,

    /// Interpreter used by the Python plugin
    #[serde(default = "default_python_path")]
    pub python_path: String,

    #[serde(default = "default_python_args")]
    pub python_args: Vec<String>,

    /// Character budget for fetched page text
    #[serde(default = "default_web_max_chars")]
    pub web_max_chars: usize,
}

fn default_bing_endpoint() -> String {
    "https://api.bing.microsoft.com/v7.0/search".into()
}
fn default_wolfram_endpoint() -> String {
    "http://api.wolframalpha.com/v2/query".into()
}
fn default_python_path() -> String {
    "python3".into()
}
fn default_python_args() -> Vec<String> {
    vec!["-u".into(), "scripts/etx_console.py".into()]
}
fn default_web_max_chars() -> usize {
    4000
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            bing_key: None,
            bing_endpoint: default_bing_endpoint(),
            wolfram_app_id: None,
            wolfram_endpoint: default_wolfram_endpoint(),
            python_path: default_python_path(),
            python_args: default_python_args(),
            web_max_chars: default_web_max_chars(),
        }
    }
}

impl std::fmt::Debug for PluginsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginsConfig")
            .field("bing_key", &redact(&self.bing_key))
            .field("bing_endpoint", &self.bing_endpoint)
            .field("wolfram_app_id", &redact(&self.wolfram_app_id))
            .field("wolfram_endpoint", &self.wolfram_endpoint)
            .field("python_path", &self.python_path)
            .field("python_args", &self.python_args)
            .field("web_max_chars", &self.web_max_chars)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file to persist conversations to. Unset = in-memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatrelay/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load configuration from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides. `lookup` returns the value of a
    /// variable, if set.
    ///
    /// - `TELEGRAM_TOKEN`, `TELEGRAM_ID` (comma separated), `ALLOW_OTHER_USERS`,
    ///   `TELEGRAM_API_ENDPOINT`
    /// - `OPENAI_KEY` (or `OPENAI_API_KEY`), `OPENAI_BASE_URL`, `DEFAULT_MODEL`
    /// - `AZURE_KEY`, `WOLFRAM_APPID`, `PYTHON_PATH`
    /// - `EDIT_WAIT_SECONDS`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.telegram.token = Some(token);
        }
        if let Some(ids) = get("TELEGRAM_ID") {
            self.telegram.allowed_users = ids
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(flag) = get("ALLOW_OTHER_USERS") {
            self.telegram.allow_other_users = parse_bool("ALLOW_OTHER_USERS", &flag)?;
        }
        if let Some(endpoint) = get("TELEGRAM_API_ENDPOINT") {
            self.telegram.api_endpoint = Some(endpoint);
        }

        if let Some(key) = get("OPENAI_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.completion.api_key = Some(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.completion.base_url = url;
        }
        if let Some(model) = get("DEFAULT_MODEL") {
            self.completion.model = model;
        }

        if let Some(key) = get("AZURE_KEY") {
            self.plugins.bing_key = Some(key);
        }
        if let Some(app_id) = get("WOLFRAM_APPID") {
            self.plugins.wolfram_app_id = Some(app_id);
        }
        if let Some(python) = get("PYTHON_PATH") {
            self.plugins.python_path = python;
        }

        if let Some(wait) = get("EDIT_WAIT_SECONDS") {
            self.delivery.edit_wait_seconds = wait.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "EDIT_WAIT_SECONDS must be a whole number of seconds, got '{wait}'"
                ))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatrelay")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::ValidationError(
                "completion.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let ratio = self.orchestrator.high_water_ratio;
        if ratio <= 0.0 || ratio > 1.0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.high_water_ratio must be in (0, 1]".into(),
            ));
        }

        if self.transport.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "transport.max_attempts must be at least 1".into(),
            ));
        }

        if self.transport.backoff_min_ms > self.transport.backoff_max_ms {
            return Err(ConfigError::ValidationError(
                "transport.backoff_min_ms must not exceed backoff_max_ms".into(),
            ));
        }

        if self.delivery.max_message_len < 16 {
            return Err(ConfigError::ValidationError(
                "delivery.max_message_len must be at least 16".into(),
            ));
        }

        Ok(())
    }

    /// Check the settings the Telegram relay cannot run without.
    pub fn validate_for_telegram(&self) -> Result<(), ConfigError> {
        if self.telegram.token.is_none() {
            return Err(ConfigError::ValidationError(
                "TELEGRAM_TOKEN is required".into(),
            ));
        }
        self.require_api_key()
    }

    /// Check that a completion API key is present.
    pub fn require_api_key(&self) -> Result<(), ConfigError> {
        if self.completion.api_key.is_none() {
            return Err(ConfigError::ValidationError(
                "OPENAI_KEY is required".into(),
            ));
        }
        Ok(())
    }

    /// Token count above which old replies are evicted.
    pub fn high_water_mark(&self) -> u32 {
        (self.completion.context_limit as f32 * self.orchestrator.high_water_ratio).round() as u32
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ValidationError(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
