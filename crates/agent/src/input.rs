//! Classification of inbound message text.

/// What an inbound message asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `/system <prompt>` or `SYSTEM: <prompt>`: store a system message,
    /// no completion.
    SystemPrompt(String),
    /// `!<plugin> <query>`: one-shot plugin call outside the conversation.
    DirectPlugin { plugin: String, query: String },
    /// Anything else: a user message.
    User(String),
}

pub fn classify(text: &str) -> Input {
    let text = text.trim();

    if let Some(prompt) = strip_command(text, "/system") {
        return Input::SystemPrompt(prompt.to_string());
    }
    if let Some(prompt) = text.strip_prefix("SYSTEM:") {
        return Input::SystemPrompt(prompt.trim().to_string());
    }

    if let Some(rest) = text.strip_prefix('!') {
        let (plugin, query) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if !plugin.is_empty() && plugin.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Input::DirectPlugin {
                plugin: plugin.to_string(),
                query: query.trim().to_string(),
            };
        }
    }

    Input::User(text.to_string())
}

/// The trimmed argument of `command` if `text` is that command, with or
/// without a `@botname` suffix.
fn strip_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(command)?;
    let rest = match rest.strip_prefix('@') {
        Some(mention) => mention.split_once(char::is_whitespace).map_or("", |(_, r)| r),
        None if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
        None => return None,
    };
    Some(rest.trim())
}
