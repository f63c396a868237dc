//! askdb-agent: ReAct reasoning loop over a tool registry
//!
//! The agent alternates model completions with tool calls until the model
//! produces a final answer, a budget runs out, or a fatal error occurs.

pub mod agent;
pub mod classify;
pub mod client;
pub mod error;
pub mod events;
pub mod handle;
pub mod history;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod tool;
pub mod transcript;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentConfig};
pub use classify::{Decision, FatalKind, LoopError, RetryPolicy};
pub use client::{CompletionClient, CompletionOptions, OBSERVATION_STOP};
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use handle::AgentHandle;
pub use history::{ChatMessage, ContextGuardConfig, ConversationHistory, GuardOutcome, Role};
pub use parser::{ParseError, ParsedStep};
pub use prompt::{PromptBuilder, PromptContext, PromptStyle};
pub use registry::ToolRegistry;
pub use tool::{Artifact, ArtifactKind, BoxedTool, Tool, ToolError, ToolOutput, parse_input};
pub use transcript::{ActionStep, FinalStep, RunConfig, RunResult, RunStatus, Step, Transcript};
