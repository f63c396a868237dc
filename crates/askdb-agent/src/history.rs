//! Conversation history and the context guard that keeps it bounded.
//!
//! The history is what the user and the agent said in earlier runs. It is
//! replayed into every prompt, so it is checked before each query: trimmed
//! to the most recent messages once it nears the soft ceiling, or cleared
//! outright past the hard ceiling.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Size in characters, not bytes
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Messages persisted across queries, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Sum of message sizes in characters
    pub fn total_chars(&self) -> usize {
        self.messages.iter().map(ChatMessage::char_count).sum()
    }

    /// Drop everything but the last `n` messages
    fn keep_last(&mut self, n: usize) {
        let excess = self.messages.len().saturating_sub(n);
        self.messages.drain(..excess);
    }
}

/// Ceilings for the context guard, in characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextGuardConfig {
    /// Past this the history is cleared
    pub hard_ceiling: usize,
    /// History plus the incoming query is kept under this
    pub soft_ceiling: usize,
    /// Messages kept when trimming
    pub keep_recent: usize,
}

impl Default for ContextGuardConfig {
    fn default() -> Self {
        Self {
            hard_ceiling: 50_000,
            soft_ceiling: 12_000,
            keep_recent: 4,
        }
    }
}

/// What a guard pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GuardOutcome {
    #[default]
    Unchanged,
    Trimmed {
        removed: usize,
        chars_before: usize,
        chars_after: usize,
    },
    Cleared {
        removed: usize,
        chars_before: usize,
    },
}

impl GuardOutcome {
    /// The caller should be told the conversation was reset
    pub fn is_cleared(&self) -> bool {
        matches!(self, GuardOutcome::Cleared { .. })
    }
}

/// Bound `history` before `query` is sent.
pub fn guard(
    history: &mut ConversationHistory,
    query: &str,
    config: &ContextGuardConfig,
) -> GuardOutcome {
    let total = history.total_chars();

    if total > config.hard_ceiling {
        let removed = history.len();
        history.clear();
        return GuardOutcome::Cleared {
            removed,
            chars_before: total,
        };
    }

    if total + query.chars().count() <= config.soft_ceiling {
        return GuardOutcome::Unchanged;
    }

    let before = history.len();
    history.keep_last(config.keep_recent);
    while !history.is_empty() && history.total_chars() > config.soft_ceiling {
        history.messages.remove(0);
    }

    GuardOutcome::Trimmed {
        removed: before - history.len(),
        chars_before: total,
        chars_after: history.total_chars(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(sizes: &[usize]) -> ConversationHistory {
        let messages = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let body = char::from(b'a' + (i % 26) as u8).to_string().repeat(n);
                if i % 2 == 0 {
                    ChatMessage::user(body)
                } else {
                    ChatMessage::assistant(body)
                }
            })
            .collect();
        ConversationHistory::from_messages(messages)
    }

    #[test]
    fn test_small_history_untouched() {
        let mut history = history_of(&[100, 200, 300]);
        let outcome = guard(&mut history, "how many users?", &ContextGuardConfig::default());
        assert_eq!(outcome, GuardOutcome::Unchanged);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_trims_to_most_recent_four() {
        // 10 messages of 2 500 chars = 25 000 total
        let mut history = history_of(&[2_500; 10]);
        let last_four: Vec<_> = history.messages()[6..].to_vec();

        let outcome = guard(&mut history, "and per country?", &ContextGuardConfig::default());

        assert_eq!(history.messages(), last_four.as_slice());
        assert_eq!(
            outcome,
            GuardOutcome::Trimmed {
                removed: 6,
                chars_before: 25_000,
                chars_after: 10_000,
            }
        );
    }

    #[test]
    fn test_trim_keeps_dropping_until_under_soft_ceiling() {
        let mut history = history_of(&[100, 5_000, 5_000, 5_000]);
        let outcome = guard(&mut history, "q", &ContextGuardConfig::default());

        assert_eq!(history.len(), 2);
        assert!(history.total_chars() <= 12_000);
        assert!(matches!(outcome, GuardOutcome::Trimmed { removed: 2, .. }));
    }

    #[test]
    fn test_query_counts_toward_soft_ceiling() {
        let mut history = history_of(&[3_000, 3_000, 3_000, 2_500, 500]);
        assert_eq!(
            guard(&mut history.clone(), "", &ContextGuardConfig::default()),
            GuardOutcome::Unchanged
        );

        let query = "x".repeat(1_000);
        let outcome = guard(&mut history, &query, &ContextGuardConfig::default());
        assert!(matches!(outcome, GuardOutcome::Trimmed { removed: 1, .. }));
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_clears_past_hard_ceiling() {
        let mut history = history_of(&[20_000, 20_000, 20_000]);
        let outcome = guard(&mut history, "hi", &ContextGuardConfig::default());

        assert!(history.is_empty());
        assert!(outcome.is_cleared());
        assert_eq!(
            outcome,
            GuardOutcome::Cleared {
                removed: 3,
                chars_before: 60_000,
            }
        );
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let msg = ChatMessage::user("héllo");
        assert_eq!(msg.char_count(), 5);
    }

    #[test]
    fn test_custom_ceilings() {
        let config = ContextGuardConfig {
            hard_ceiling: 1_000,
            soft_ceiling: 300,
            keep_recent: 2,
        };
        let mut history = history_of(&[100, 100, 100, 100]);
        guard(&mut history, "q", &config);
        assert_eq!(history.len(), 2);
        assert!(history.total_chars() <= 300);
    }
}
