//! /report command - write a report and optionally email it

use super::CommandResult;

pub struct ReportCommand;

impl ReportCommand {
    /// Accepts no arguments, `email ADDR`, or a bare address
    pub fn execute(args: &str) -> CommandResult {
        let mut words = args.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (None, _, _) => CommandResult::Report { email: None },
            (Some("email"), Some(addr), None) => CommandResult::Report {
                email: Some(addr.to_string()),
            },
            (Some(addr), None, None) if addr.contains('@') => CommandResult::Report {
                email: Some(addr.to_string()),
            },
            _ => CommandResult::Message("Usage: /report [email ADDRESS]".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_arguments() {
        assert_eq!(ReportCommand::execute(""), CommandResult::Report { email: None });
        assert_eq!(
            ReportCommand::execute("team@example.com"),
            CommandResult::Report {
                email: Some("team@example.com".into())
            }
        );
        assert!(matches!(
            ReportCommand::execute("email"),
            CommandResult::Message(_)
        ));
    }
}
