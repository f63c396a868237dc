//! Tool trait and invocation results

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// What kind of file a tool produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Vega-Lite chart specification
    Chart,
    /// Graphviz relationship diagram
    Diagram,
    /// Markdown report
    Report,
    /// Queued email message
    Email,
}

/// A file written by a tool, reported to the caller explicitly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Successful result of a tool invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Observation text handed back to the model
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl ToolOutput {
    /// Create a plain text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            artifacts: Vec::new(),
        }
    }

    /// Attach a produced file
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// Errors a tool can report.
///
/// `Timeout` and `Credentials` end the run; everything else is shown to the
/// model as the observation so it can correct itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The input could not be understood
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backing service did not answer in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The backing service rejected our credentials
    #[error("Credentials rejected: {0}")]
    Credentials(String),

    /// Any other failure, e.g. a SQL error
    #[error("Error: {0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Trait for tools the model can call by name with a single string argument
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, matched exactly against the model's `Action:` line
    fn name(&self) -> &str;

    /// Description shown to the model in the tool catalog
    fn description(&self) -> &str;

    /// JSON Schema for structured input. Tools that take free text return `None`.
    fn input_schema(&self) -> Option<serde_json::Value> {
        None
    }

    /// Run the tool
    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError>;
}

/// A type-erased, shareable tool
pub type BoxedTool = Arc<dyn Tool>;

/// Deserialize a JSON object input into `T`.
pub fn parse_input<T: DeserializeOwned>(input: &str) -> Result<T, ToolError> {
    serde_json::from_str(input.trim())
        .map_err(|e| ToolError::invalid_input(format!("expected a JSON object: {}", e)))
}
