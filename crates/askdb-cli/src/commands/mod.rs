//! Slash commands for interactive mode

mod history;
mod report;

pub use history::HistoryCommand;
pub use report::ReportCommand;

use askdb_agent::Agent;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Clear the conversation history
    Clear,
    /// Toggle printing of reasoning steps
    ToggleSteps,
    /// Write a report, optionally queueing it by email
    Report { email: Option<String> },
    /// Show a message to the user (not sent to agent)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, agent: &Agent) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "history" => HistoryCommand::execute(agent),

        "tools" => CommandResult::Message(tools_message(agent)),

        "steps" => CommandResult::ToggleSteps,

        "report" | "r" => ReportCommand::execute(args),

        _ => CommandResult::Unknown(command),
    })
}

fn tools_message(agent: &Agent) -> String {
    let mut out = format!("Tools ({}):\n", agent.registry().len());
    for tool in agent.registry().tools() {
        out.push_str(&format!(
            "  {:<34} {}\n",
            tool.name(),
            crate::utils::truncate_chars(tool.description(), 60)
        ));
    }
    out.push_str(&format!("\nPrompt style: {}", agent.prompt_style().as_str()));
    out
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?            Show this help message
  /history                 Show the conversation history
  /tools                   List the tools the agent can use
  /steps                   Toggle printing of reasoning steps
  /report, /r [email ADDR] Write a Markdown report, optionally emailing it
  /clear, /c               Clear conversation history
  /quit, /exit, /q         Exit askdb

Examples:
  /report                  Write a report to the report directory
  /report email a@b.com    Write a report and queue it for a@b.com"#
        .to_string()
}
