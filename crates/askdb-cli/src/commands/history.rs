//! /history command - show the conversation kept for follow-up questions

use super::CommandResult;
use askdb_agent::{Agent, Role};

pub struct HistoryCommand;

impl HistoryCommand {
    pub fn execute(agent: &Agent) -> CommandResult {
        let history = agent.history();
        if history.is_empty() {
            return CommandResult::Message("No conversation history yet.".to_string());
        }

        let guard = &agent.config().context_guard;
        let mut output = format!(
            "History: {} messages, {} of {} characters\n",
            history.len(),
            history.total_chars(),
            guard.soft_ceiling
        );
        output.push_str(&"-".repeat(40));
        output.push('\n');

        for (i, message) in history.messages().iter().enumerate() {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let preview = crate::utils::truncate_chars(&message.content, 70).replace('\n', " ");
            output.push_str(&format!("  {:>2}: [{}] {}\n", i, role, preview));
        }
        CommandResult::Message(output)
    }
}
