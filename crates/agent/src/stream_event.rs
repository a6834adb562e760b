//! Items on an orchestrator turn's output stream.
//!
//! A turn emits a sequence of [`OutputChunk`]s and then closes its channel.
//! Channels render each chunk into one outbound message; the prefix lets
//! users tell model answers from diagnostics and failures at a glance.

use serde::{Deserialize, Serialize};

pub const INFO_PREFIX: &str = "ℹ️ ";
pub const ERROR_PREFIX: &str = "❌ ";

/// One unit of output from a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum OutputChunk {
    /// Text written by the model.
    Text(String),
    /// Diagnostics and plugin answers.
    Info(String),
    /// The turn failed; this is the last chunk.
    Error(String),
}

impl OutputChunk {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(t) | Self::Info(t) | Self::Error(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Info(_) => "info",
            Self::Error(_) => "error",
        }
    }

    /// The message text to deliver, prefixed by kind.
    pub fn render(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Info(t) => format!("{INFO_PREFIX}{t}"),
            Self::Error(t) => format!("{ERROR_PREFIX}{t}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
