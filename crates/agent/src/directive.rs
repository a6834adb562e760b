//! Plugin directives embedded in model replies.
//!
//! The model asks for outside help by writing a line of the form
//!
//! ```text
//! ℹ️ Ask Bing: weather in Paris tomorrow
//! ```
//!
//! optionally with the query in a fenced block:
//!
//! ````text
//! ℹ️ Ask Python:
//!
//! ```python
//! sum(range(10))
//! ```
//! ````
//!
//! [`parse_directive`] is the only place that looks at raw reply text; the
//! orchestrator works with the [`DirectiveParse`] it returns.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Marker prefix the model writes before a plugin query.
pub const MARKER: &str = "ℹ️ Ask";

/// `ℹ` with an optional variation selector, "Ask", the plugin name, an
/// optional colon, then everything after it as the query body.
static DIRECTIVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)ℹ\x{FE0F}?[ \t]*[Aa]sk[ \t]+([A-Za-z][A-Za-z0-9_\-]*)[ \t]*:?(.*)").ok()
});

/// Result of scanning a reply for a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveParse {
    Directive { plugin: String, query: String },
    NoDirective,
}

impl DirectiveParse {
    pub fn is_directive(&self) -> bool {
        matches!(self, Self::Directive { .. })
    }
}

/// Find the first directive in `reply`.
pub fn parse_directive(reply: &str) -> DirectiveParse {
    let Some(re) = DIRECTIVE.as_ref() else {
        return DirectiveParse::NoDirective;
    };
    let Some(caps) = re.captures(reply) else {
        return DirectiveParse::NoDirective;
    };

    let plugin = caps
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    DirectiveParse::Directive {
        plugin,
        query: unwrap_fence(body.trim()).to_string(),
    }
}

/// If `body` opens with a code fence, return the fenced content only.
fn unwrap_fence(body: &str) -> &str {
    let Some(after_ticks) = body.strip_prefix("```") else {
        return body;
    };
    // Drop the info string (language tag) on the opening line.
    let content = match after_ticks.find('\n') {
        Some(newline) => &after_ticks[newline + 1..],
        None => after_ticks,
    };
    match content.find("```") {
        Some(end) => content[..end].trim(),
        None => content.trim(),
    }
}
