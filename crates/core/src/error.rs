//! Error types for the chatrelay domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] ties them together.

use thiserror::Error;

/// The top-level error type for all chatrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Plugin errors ---
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failure of a single HTTP exchange, after retries.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("failed to connect: {status} {body}")]
    Status { status: u16, body: String },

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Invalid request: {0}")]
    Request(String),
}

impl TransportError {
    /// HTTP status code, when the failure was a non-success response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by completion API")]
    RateLimited,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Bad response from completion API: {0}")]
    Decode(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the error is a 400-class rejection that may be caused by an
    /// oversized message list.
    pub fn is_bad_request(&self) -> bool {
        match self {
            Self::ContextLengthExceeded(_) => true,
            Self::ApiError { status_code, .. } => *status_code == 400,
            Self::Transport(e) => e.status() == Some(400),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Process bridge failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Could not decode {plugin} response: {reason}")]
    Decode { plugin: String, reason: String },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to write to subprocess: {0}")]
    Write(String),

    #[error("Failed to read from subprocess: {0}")]
    Read(String),

    #[error("Subprocess closed its output stream")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Unauthorized sender: {sender_id} on {channel}")]
    Unauthorized { channel: String, sender_id: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        });
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn transport_status_message() {
        let err = TransportError::Status {
            status: 404,
            body: "Not Found".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().starts_with("failed to connect: 404"));
        assert_eq!(TransportError::Network("refused".into()).status(), None);
    }

    #[test]
    fn bad_request_detection() {
        assert!(ProviderError::ContextLengthExceeded("too long".into()).is_bad_request());
        assert!(
            ProviderError::ApiError {
                status_code: 400,
                message: "bad".into()
            }
            .is_bad_request()
        );
        assert!(
            ProviderError::Transport(TransportError::Status {
                status: 400,
                body: String::new()
            })
            .is_bad_request()
        );
        assert!(!ProviderError::RateLimited.is_bad_request());
        assert!(
            !ProviderError::ApiError {
                status_code: 500,
                message: "oops".into()
            }
            .is_bad_request()
        );
    }

    #[test]
    fn plugin_error_from_bridge() {
        let err: PluginError = BridgeError::Closed.into();
        assert!(err.to_string().contains("closed"));
        let top: Error = err.into();
        assert!(top.to_string().starts_with("Plugin error"));
    }

    #[test]
    fn channel_error_displays() {
        let err = ChannelError::Unauthorized {
            channel: "telegram".into(),
            sender_id: "42".into(),
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("telegram"));
    }
}
