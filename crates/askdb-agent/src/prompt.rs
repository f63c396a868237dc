//! Prompt builders
//!
//! Every prompt has the same skeleton: preamble, tool catalog, format
//! instructions, a worked example, style-specific guidelines, the prior
//! conversation, and finally the question with the scratchpad of steps
//! taken so far. The prompt always ends in `Thought:` so the model
//! continues the trace.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::history::{ChatMessage, Role};
use crate::registry::ToolRegistry;
use crate::transcript::{Step, Transcript};

/// Longest observation replayed into the scratchpad, in characters
const MAX_OBSERVATION_CHARS: usize = 4_000;

const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question";

const WORKED_EXAMPLE: &str = "Example:

Question: How many users are there?
Thought: I should see which tables exist.
Action: sql_db_list_tables
Action Input:
Observation: orders, users
Thought: The users table holds the answer. I will count its rows.
Action: sql_db_query
Action Input: SELECT COUNT(*) FROM users
Observation: 3
Thought: I now know the final answer
Final Answer: There are 3 users.";

/// Everything a builder needs for one completion request
pub struct PromptContext<'a> {
    pub query: &'a str,
    pub tools: &'a ToolRegistry,
    pub history: &'a [ChatMessage],
    pub transcript: &'a Transcript,
    /// Format-correction note after a malformed completion
    pub correction: Option<&'a str>,
}

/// Which instruction set to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptStyle {
    /// Short generic instructions
    Plain,
    /// SQL-analyst instructions: inspect the schema, limit results, no DML
    #[default]
    SchemaAware,
    /// Schema-aware plus guidance for the chart and diagram tools
    Visualization,
}

impl PromptStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStyle::Plain => "plain",
            PromptStyle::SchemaAware => "schema-aware",
            PromptStyle::Visualization => "visualization",
        }
    }

    /// Builder for this style against a SQLite database
    pub fn builder(self) -> Box<dyn PromptBuilder> {
        match self {
            PromptStyle::Plain => Box::new(PlainPrompt),
            PromptStyle::SchemaAware => Box::new(SchemaAwarePrompt::new("sqlite", 10)),
            PromptStyle::Visualization => Box::new(VisualizationPrompt::new("sqlite", 10)),
        }
    }
}

impl FromStr for PromptStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "plain" => Ok(PromptStyle::Plain),
            "schema-aware" | "schema" | "sql" => Ok(PromptStyle::SchemaAware),
            "visualization" | "viz" => Ok(PromptStyle::Visualization),
            other => Err(Error::InvalidConfig(format!(
                "unknown prompt style '{}' (expected plain, schema-aware or visualization)",
                other
            ))),
        }
    }
}

/// Strategy for the instruction text around the shared skeleton
pub trait PromptBuilder: Send + Sync {
    fn style(&self) -> PromptStyle;

    /// Opening instructions, placed before the tool catalog
    fn preamble(&self) -> String;

    /// Extra guidance placed after the worked example
    fn guidelines(&self) -> Option<String> {
        None
    }

    /// Assemble the full prompt
    fn build(&self, ctx: &PromptContext<'_>) -> String {
        render(&self.preamble(), self.guidelines().as_deref(), ctx)
    }
}

pub struct PlainPrompt;

impl PromptBuilder for PlainPrompt {
    fn style(&self) -> PromptStyle {
        PromptStyle::Plain
    }

    fn preamble(&self) -> String {
        "Answer the following question as best you can. You have access to the following tools:"
            .to_string()
    }
}

pub struct SchemaAwarePrompt {
    dialect: String,
    top_k: usize,
}

impl SchemaAwarePrompt {
    pub fn new(dialect: impl Into<String>, top_k: usize) -> Self {
        Self {
            dialect: dialect.into(),
            top_k,
        }
    }
}

const SQL_PREAMBLE: &str = "You are an agent that answers questions about a {dialect} database.
Given a question, write a syntactically correct {dialect} query, run it, look at the results and answer.
Unless the user asks for a specific number of rows, limit queries to at most {top_k} results.
Only select the columns relevant to the question; never select every column of a table.
Look at the tables and their schema before writing a query. Do not guess column names.
Check a query with the query checker before running it. If a query fails, read the error, rewrite the query and try again.
Never issue INSERT, UPDATE, DELETE, DROP or other statements that change the database.
If the question has nothing to do with the database, answer \"I don't know\".

You have access to the following tools:";

impl PromptBuilder for SchemaAwarePrompt {
    fn style(&self) -> PromptStyle {
        PromptStyle::SchemaAware
    }

    fn preamble(&self) -> String {
        SQL_PREAMBLE
            .replace("{dialect}", &self.dialect)
            .replace("{top_k}", &self.top_k.to_string())
    }

    fn guidelines(&self) -> Option<String> {
        Some(
            "Always run queries to get actual data. Do not describe what you would do, do it."
                .to_string(),
        )
    }
}

pub struct VisualizationPrompt {
    sql: SchemaAwarePrompt,
}

impl VisualizationPrompt {
    pub fn new(dialect: impl Into<String>, top_k: usize) -> Self {
        Self {
            sql: SchemaAwarePrompt::new(dialect, top_k),
        }
    }
}

const VISUALIZATION_GUIDELINES: &str = "Visualization guidelines:
- Run the SQL query first to confirm it returns the data you expect, then visualize it.
- Use create_database_visualization for charts built from query results. Its input is a JSON object:
  {\"query\": \"SELECT ...\", \"chart_type\": \"bar\", \"title\": \"...\", \"x_column\": \"...\", \"y_column\": \"...\"}
  chart_type is one of bar, line, scatter, pie, histogram, heatmap, network. Only query is required.
  A network chart takes source and target columns, e.g. pairs of related entities.
- Use create_table_relationship_diagram when the user asks how tables are connected.
- Mention the files that were created in your final answer and summarize what the data shows.";

impl PromptBuilder for VisualizationPrompt {
    fn style(&self) -> PromptStyle {
        PromptStyle::Visualization
    }

    fn preamble(&self) -> String {
        self.sql
            .preamble()
            .replacen("You are an agent", "You are an analyst with visualization tools", 1)
    }

    fn guidelines(&self) -> Option<String> {
        Some(VISUALIZATION_GUIDELINES.to_string())
    }
}

fn render(preamble: &str, guidelines: Option<&str>, ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();

    out.push_str(preamble);
    out.push_str("\n\n");
    for tool in ctx.tools.tools() {
        out.push_str(&format!("{}: {}\n", tool.name(), tool.description()));
    }
    out.push('\n');

    out.push_str(&FORMAT_INSTRUCTIONS.replace("{tool_names}", &ctx.tools.names().join(", ")));
    out.push_str("\n\n");
    out.push_str(WORKED_EXAMPLE);
    out.push_str("\n\n");

    if let Some(guidelines) = guidelines {
        out.push_str(guidelines);
        out.push_str("\n\n");
    }

    if !ctx.history.is_empty() {
        out.push_str("Previous conversation:\n");
        for message in ctx.history {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(&format!("{}: {}\n", speaker, message.content));
        }
        out.push('\n');
    }

    out.push_str("Begin!\n\n");
    if let Some(note) = ctx.correction {
        out.push_str(&format!("Important: {}\n\n", note));
    }
    out.push_str(&format!("Question: {}\nThought:", ctx.query));
    out.push_str(&scratchpad(ctx.transcript));
    out
}

/// Replay the steps taken so far in the trace format
fn scratchpad(transcript: &Transcript) -> String {
    let mut out = String::new();
    for step in transcript.steps() {
        if let Step::Action(action) = step {
            if !action.thought.is_empty() {
                out.push(' ');
                out.push_str(&action.thought);
            }
            out.push_str(&format!(
                "\nAction: {}\nAction Input: {}\nObservation: {}\nThought:",
                action.tool_name,
                action.tool_input,
                clip(&action.observation, MAX_OBSERVATION_CHARS)
            ));
        }
    }
    out
}

fn clip(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... (truncated)", &s[..idx]),
        None => s.to_string(),
    }
}
