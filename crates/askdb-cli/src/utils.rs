//! Shared utilities

use askdb_agent::{Step, Transcript};

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Render the reasoning steps of a run for display
pub fn format_transcript(transcript: &Transcript) -> String {
    let mut out = String::new();
    let mut step_no = 0;
    for step in transcript.steps() {
        match step {
            Step::Action(action) => {
                step_no += 1;
                out.push_str(&format!("Step {}: {}\n", step_no, action.tool_name));
                if !action.thought.is_empty() {
                    out.push_str(&format!("  Thought: {}\n", action.thought));
                }
                if !action.tool_input.is_empty() {
                    out.push_str(&format!("  Input: {}\n", action.tool_input));
                }
                let label = if action.is_error { "Error" } else { "Output" };
                out.push_str(&format!(
                    "  {}: {}\n",
                    label,
                    truncate_chars(&action.observation, 500).replace('\n', "\n    ")
                ));
            }
            Step::Final(end) => {
                if !end.thought.is_empty() {
                    out.push_str(&format!("Thought: {}\n", end.thought));
                }
            }
        }
    }
    out
}
