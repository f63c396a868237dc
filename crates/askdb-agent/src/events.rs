//! Agent event types

use serde::{Deserialize, Serialize};

use crate::transcript::RunStatus;

/// Events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A run started
    RunStart { run_id: String, query: String },

    /// The loop entered THINKING
    IterationStart { iteration: u32 },

    /// Completion text as it streams in
    CompletionDelta { iteration: u32, delta: String },

    /// A tool is about to run
    ToolStart {
        iteration: u32,
        tool_name: String,
        tool_input: String,
    },

    /// A tool finished
    ToolEnd {
        iteration: u32,
        tool_name: String,
        observation: String,
        is_error: bool,
    },

    /// The completion was malformed and will be requested again
    ParseRetry { attempt: u32, reason: String },

    /// Old messages were dropped from the history
    HistoryTrimmed { removed: usize, chars_after: usize },

    /// The history was reset
    HistoryCleared { removed: usize, chars_before: usize },

    /// The run finished
    RunEnd {
        run_id: String,
        status: RunStatus,
        iterations: u32,
    },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::RunEnd { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AgentEvent::ToolStart {
            iteration: 1,
            tool_name: "sql_db_query".into(),
            tool_input: "SELECT 1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_start");
        assert_eq!(json["tool_name"], "sql_db_query");
        assert!(!event.is_terminal());

        let end = AgentEvent::RunEnd {
            run_id: "r".into(),
            status: RunStatus::Ok,
            iterations: 2,
        };
        assert!(end.is_terminal());
        assert_eq!(serde_json::to_value(&end).unwrap()["status"], "ok");
    }
}
