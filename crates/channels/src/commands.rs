//! Chat commands understood by the relay.

use chatrelay_core::plugin::PluginRegistry;

pub const HELP: &str = "Send a message to start talking with the assistant. \
Use /reset at any point to clear the conversation history and start from scratch \
(it won't delete the Telegram messages).

/system <prompt> sets a system prompt, /ask_friends lets the assistant consult its plugins, \
!<plugin> <query> asks a plugin directly, /verbose toggles diagnostics and /stats shows \
the conversation size.";

pub const RESET_DONE: &str = "Started a new conversation. Enjoy!";
pub const UNKNOWN_CHAT: &str = "Unknown chat ID.";
pub const UNKNOWN_COMMAND: &str = "Unknown command. Send /help to see a list of commands.";
pub const UNAUTHORIZED: &str = "You are not authorized to use this bot.";
pub const NO_PLUGINS: &str = "No plugins are configured.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Reset,
    Chats,
    /// `/chat_<id>` or `/chat-<id>`; the id may be empty.
    Chat(String),
    Verbose,
    AskFriends,
    /// `/system`: handled by the orchestrator like any other message.
    System,
    Stats,
    Unknown(String),
}

impl Command {
    /// Parse a command name (without the leading `/` or `@bot` suffix).
    pub fn parse(name: &str) -> Self {
        match name {
            "help" | "start" => Self::Help,
            "reset" => Self::Reset,
            "chats" => Self::Chats,
            "verbose" => Self::Verbose,
            "ask_friends" => Self::AskFriends,
            "system" => Self::System,
            "stats" => Self::Stats,
            other => match other
                .strip_prefix("chat_")
                .or_else(|| other.strip_prefix("chat-"))
            {
                Some(id) => Self::Chat(id.to_string()),
                None => Self::Unknown(other.to_string()),
            },
        }
    }
}

/// The system prompt that teaches the model the plugin directive
/// convention, listing the registered plugins. `None` with no plugins.
pub fn ask_friends_prompt(plugins: &PluginRegistry) -> Option<String> {
    let names = plugins.names();
    if names.is_empty() {
        return None;
    }

    let mut prompt = format!(
        "Your calculation is error-prone and your information may be outdated, but now you \
         are allowed to send queries to {} before giving an answer.\n\n\
         1. Each message you send is either a query, starting with \"ℹ️ Ask ({}):\\n\\n\", \
         or your own answer.\n",
        join_names(&names),
        names.join("|"),
    );
    let mut item = 2;
    for name in &names {
        if let Some(plugin) = plugins.get(name) {
            prompt.push_str(&format!("{item}. Ask {name}: {}\n", plugin.description()));
            item += 1;
        }
    }
    prompt.push_str(&format!(
        "{item}. Ensure the accuracy of your final answer, while minimizing your number of \
         queries and their lengths."
    ));
    Some(prompt)
}

/// "A", "A and B", "A, B and C".
fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => (*one).to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}
