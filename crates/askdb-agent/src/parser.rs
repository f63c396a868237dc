//! Step parser for ReAct-formatted completions
//!
//! A completion is either
//!
//! ```text
//! Thought: <free text>
//! Action: <tool name>
//! Action Input: <input>
//! ```
//!
//! or
//!
//! ```text
//! Thought: <free text>
//! Final Answer: <answer>
//! ```
//!
//! When both shapes appear the action wins: the model has asked for a tool
//! and its "answer" was written before seeing the result.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t*]*Action[ \t]*\d*[ \t]*:[ \t]*(.*)$").unwrap());

static ACTION_INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t*]*Action[ \t]*\d*[ \t]*Input[ \t]*\d*[ \t]*:[ \t]*").unwrap()
});

static FINAL_ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Final[ \t]+Answer[ \t]*:[ \t]*").unwrap());

/// Sections the model sometimes writes after the action input
static TRAILING_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:Observation|Thought|Final[ \t]+Answer)[ \t]*:").unwrap()
});

static ACTION_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\baction(?:[ \t]+input)?[ \t]*:|\bobservation[ \t]*:").unwrap());

/// Phrases announcing a step the model has not taken yet
static INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[.!?]\s+)(?:I(?:['’]ll|\s+(?:will|need\s+to|should|must|am\s+going\s+to|have\s+to|want\s+to))\b|let\s+me\s+(?:check|query|look|see|find|run|use|try|start|first|examine|inspect|list|verify|write|get)\b|let's\b|first,)",
    )
    .unwrap()
});

/// One parsed completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedStep {
    Action {
        thought: String,
        tool: String,
        input: String,
    },
    Final {
        thought: String,
        answer: String,
    },
}

/// A completion that could not be turned into a step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Neither `Action:` nor `Final Answer:` was found
    #[error("Could not parse LLM output: no `Action:` or `Final Answer:` found")]
    MissingMarkers { text: String },

    /// The markers were there but the step is incomplete
    #[error("Could not parse LLM output: {reason}")]
    Malformed { reason: String, text: String },

    /// The requested tool is not registered
    #[error("`{tool}` is not a valid tool")]
    UnknownTool { tool: String, text: String },
}

impl ParseError {
    /// The offending completion
    pub fn text(&self) -> &str {
        match self {
            ParseError::MissingMarkers { text }
            | ParseError::Malformed { text, .. }
            | ParseError::UnknownTool { text, .. } => text,
        }
    }

    /// Note appended to the next prompt so the model can fix its format
    pub fn correction(&self, tool_names: &[&str]) -> String {
        let tools = tool_names.join(", ");
        match self {
            ParseError::MissingMarkers { .. } => format!(
                "Your previous response did not follow the required format. \
                 Reply with a `Thought:` line followed by either `Action:` (one of [{}]) \
                 and `Action Input:` lines, or a `Final Answer:` line.",
                tools
            ),
            ParseError::Malformed { reason, .. } => format!(
                "Your previous response could not be used: {}. \
                 Every `Action:` line must be followed by an `Action Input:` line.",
                reason
            ),
            ParseError::UnknownTool { tool, .. } => format!(
                "`{}` is not a valid tool. The action must be exactly one of [{}].",
                tool, tools
            ),
        }
    }
}

/// Parse one raw completion.
///
/// Tool names are not checked here; the caller matches them against its
/// registry and reports misses as [`ParseError::UnknownTool`].
pub fn parse(raw: &str) -> Result<ParsedStep, ParseError> {
    let text = raw.trim();

    if let Some(caps) = ACTION_RE.captures(text) {
        let (Some(line), Some(name)) = (caps.get(0), caps.get(1)) else {
            return Err(ParseError::MissingMarkers {
                text: raw.to_string(),
            });
        };
        let tool = clean_tool_name(name.as_str());
        let thought = clean_thought(&text[..line.start()]);
        let after = &text[line.end()..];

        let Some(marker) = ACTION_INPUT_RE.find(after) else {
            return Err(ParseError::Malformed {
                reason: format!("`Action: {}` has no `Action Input:`", tool),
                text: raw.to_string(),
            });
        };
        if tool.is_empty() {
            return Err(ParseError::Malformed {
                reason: "`Action:` names no tool".into(),
                text: raw.to_string(),
            });
        }

        let rest = &after[marker.end()..];
        let rest = match TRAILING_SECTION_RE.find(rest) {
            Some(m) => &rest[..m.start()],
            None => rest,
        };

        return Ok(ParsedStep::Action {
            thought,
            tool,
            input: normalize_input(rest),
        });
    }

    if let Some(m) = FINAL_ANSWER_RE.find(text) {
        let answer = text[m.end()..].trim();
        if answer.is_empty() {
            return Err(ParseError::Malformed {
                reason: "`Final Answer:` is empty".into(),
                text: raw.to_string(),
            });
        }
        return Ok(ParsedStep::Final {
            thought: clean_thought(&text[..m.start()]),
            answer: answer.to_string(),
        });
    }

    Err(ParseError::MissingMarkers {
        text: raw.to_string(),
    })
}

/// Recover an answer the model gave without the `Final Answer:` marker.
///
/// Returns `None` when the text is empty, mentions actions or observations,
/// or announces something the model still intends to do.
pub fn direct_answer(text: &str) -> Option<String> {
    let body = clean_thought(text);
    if body.is_empty() || body.ends_with(':') {
        return None;
    }
    if ACTION_HINT_RE.is_match(&body) || INTENT_RE.is_match(&body) {
        return None;
    }
    Some(body)
}

fn clean_thought(text: &str) -> String {
    let text = text.trim();
    text.strip_prefix("Thought:")
        .unwrap_or(text)
        .trim()
        .to_string()
}

fn clean_tool_name(name: &str) -> String {
    name.trim()
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '*'))
        .trim()
        .to_string()
}

/// Strip code fences and one pair of wrapping quotes from an action input
fn normalize_input(input: &str) -> String {
    let mut s = input.trim();

    if let Some(rest) = s.strip_prefix("```") {
        // Drop the info string (```sql) along with the fence
        let body = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
        s = body.trim_end().strip_suffix("```").unwrap_or(body).trim();
    }

    for quote in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            let inner = &s[1..s.len() - 1];
            if !inner.contains(quote) {
                s = inner.trim();
                break;
            }
        }
    }

    s.to_string()
}
