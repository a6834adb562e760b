//! Sender allow-list.

use chatrelay_config::TelegramConfig;

/// Which senders may use the relay.
///
/// An empty list admits everyone. `"*"` in the list, or
/// `allow_other_users`, does the same for a non-empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    users: Vec<String>,
    allow_others: bool,
}

impl Allowlist {
    pub fn new(users: Vec<String>, allow_others: bool) -> Self {
        Self {
            users,
            allow_others,
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(config.allowed_users.clone(), config.allow_other_users)
    }

    pub fn is_allowed(&self, sender_id: &str) -> bool {
        self.users.is_empty()
            || self.allow_others
            || self.users.iter().any(|u| u == "*" || u == sender_id)
    }

    pub fn is_restricted(&self) -> bool {
        !self.users.is_empty() && !self.allow_others
    }
}
