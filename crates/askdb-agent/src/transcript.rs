//! Per-run transcript and run results

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::history::GuardOutcome;
use crate::tool::Artifact;

/// One tool call and what it returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub thought: String,
    pub tool_name: String,
    pub tool_input: String,
    pub observation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    /// The observation is an error message rather than tool output
    #[serde(default)]
    pub is_error: bool,
}

/// The model's terminal answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalStep {
    pub thought: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Action(ActionStep),
    Final(FinalStep),
}

/// Ordered, append-only record of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    steps: Vec<Step>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn action_steps(&self) -> impl Iterator<Item = &ActionStep> {
        self.steps.iter().filter_map(|s| match s {
            Step::Action(a) => Some(a),
            Step::Final(_) => None,
        })
    }

    /// Observation of the most recent successful tool call
    pub fn last_observation(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .filter_map(|s| match s {
                Step::Action(a) if !a.is_error => Some(a.observation.as_str()),
                _ => None,
            })
            .next()
    }

    /// All artifacts, in the order they were produced
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.action_steps().flat_map(|a| a.artifacts.iter())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Timeout,
    ParseError,
    ApiError,
    Exhausted,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Timeout => "timeout",
            RunStatus::ParseError => "parse_error",
            RunStatus::ApiError => "api_error",
            RunStatus::Exhausted => "exhausted",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budgets for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub max_iterations: u32,
    #[serde(with = "duration_secs")]
    pub max_execution_time: Duration,
    /// Consecutive malformed completions tolerated before giving up
    pub max_retries: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_execution_time: Duration::from_secs(300),
            max_retries: 2,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Outcome of one `Agent::run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Answer text. Always present, even on failure.
    pub output: String,
    pub transcript: Transcript,
    pub status: RunStatus,
    /// Completions requested
    pub iterations: u32,
    pub parse_retries: u32,
    #[serde(skip)]
    pub elapsed: Duration,
    /// What the context guard did to the history before this run
    pub history: GuardOutcome,
}

impl RunResult {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.transcript.artifacts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ArtifactKind;

    fn action(tool: &str, observation: &str, is_error: bool) -> Step {
        Step::Action(ActionStep {
            thought: String::new(),
            tool_name: tool.into(),
            tool_input: String::new(),
            observation: observation.into(),
            artifacts: Vec::new(),
            is_error,
        })
    }

    #[test]
    fn test_last_observation_skips_errors() {
        let mut transcript = Transcript::new();
        assert!(transcript.last_observation().is_none());

        transcript.push(action("sql_db_query", "3", false));
        transcript.push(action("sql_db_query", "no such column: nme", true));
        assert_eq!(transcript.last_observation(), Some("3"));
    }

    #[test]
    fn test_artifacts_in_order() {
        let mut transcript = Transcript::new();
        let mut step = ActionStep {
            thought: String::new(),
            tool_name: "create_database_visualization".into(),
            tool_input: String::new(),
            observation: "ok".into(),
            artifacts: vec![Artifact::new(ArtifactKind::Chart, "a.vl.json")],
            is_error: false,
        };
        transcript.push(Step::Action(step.clone()));
        step.artifacts = vec![Artifact::new(ArtifactKind::Diagram, "b.dot")];
        transcript.push(Step::Action(step));
        transcript.push(Step::Final(FinalStep {
            thought: String::new(),
            answer: "done".into(),
        }));

        let paths: Vec<_> = transcript
            .artifacts()
            .map(|a| a.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec!["a.vl.json", "b.dot"]);
        assert_eq!(transcript.action_steps().count(), 2);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::ParseError).unwrap(),
            "\"parse_error\""
        );
        assert_eq!(RunStatus::ApiError.to_string(), "api_error");
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.max_execution_time, Duration::from_secs(300));
        assert_eq!(config.max_retries, 2);
    }
}
