//! Error classification and retry policy for the reasoning loop

use std::sync::LazyLock;

use regex::Regex;

use crate::parser::ParseError;
use crate::tool::ToolError;
use crate::transcript::RunStatus;

/// Shown when the model keeps producing unusable output
pub const PARSE_FAILURE_ANSWER: &str = "I'm sorry, I had trouble working out how to answer that. \
Could you rephrase the question, or make it more specific?";

const CONFIG_CHECK: &str = "Please check your API key and model configuration.";

static TIMEOUT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btime[ds]?[ _-]?out\b").unwrap());

static CREDENTIAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bapi\b",
        r"(?i)openai",
        r"(?i)credential",
        r"(?i)unauthori[sz]ed",
        r"(?i)authenticat",
        r"(?i)\b40[13]\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    Timeout,
    ApiError,
    /// The prompt no longer fits the model; history must be dropped
    ContextOverflow,
    Exhausted,
    Cancelled,
}

impl FatalKind {
    pub fn status(&self) -> RunStatus {
        match self {
            FatalKind::Timeout => RunStatus::Timeout,
            FatalKind::ApiError | FatalKind::ContextOverflow => RunStatus::ApiError,
            FatalKind::Exhausted => RunStatus::Exhausted,
            FatalKind::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// What the loop should do about a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Ask for the same step again
    Retry,
    /// Stop and answer with this text
    SynthesizeAnswer(String),
    /// Record this text as the step's observation and keep going
    Observe(String),
    /// Stop with a failure status
    Fatal(FatalKind),
}

/// Anything that can go wrong inside one iteration
#[derive(Debug)]
pub enum LoopError<'a> {
    Parse(&'a ParseError),
    Tool(&'a ToolError),
    Completion(&'a askdb_ai::Error),
    IterationsExhausted,
}

/// Decides between retrying, observing, and giving up
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `retries_used` counts consecutive parse failures so far.
    pub fn classify(&self, error: &LoopError<'_>, retries_used: u32) -> Decision {
        match error {
            LoopError::Parse(_) if retries_used < self.max_retries => Decision::Retry,
            LoopError::Parse(_) => Decision::SynthesizeAnswer(PARSE_FAILURE_ANSWER.to_string()),
            LoopError::Tool(e) => classify_tool_error(e),
            LoopError::Completion(e) => Decision::Fatal(classify_completion_error(e)),
            LoopError::IterationsExhausted => Decision::Fatal(FatalKind::Exhausted),
        }
    }
}

fn classify_tool_error(error: &ToolError) -> Decision {
    match error {
        ToolError::Timeout(_) => Decision::Fatal(FatalKind::Timeout),
        ToolError::Credentials(_) => Decision::Fatal(FatalKind::ApiError),
        ToolError::InvalidInput(_) => Decision::Observe(error.to_string()),
        ToolError::Failed(message) => {
            if is_timeout_message(message) {
                Decision::Fatal(FatalKind::Timeout)
            } else if is_credential_message(message) {
                Decision::Fatal(FatalKind::ApiError)
            } else {
                Decision::Observe(error.to_string())
            }
        }
    }
}

fn classify_completion_error(error: &askdb_ai::Error) -> FatalKind {
    if matches!(error, askdb_ai::Error::Aborted) {
        FatalKind::Cancelled
    } else if error.is_timeout() {
        FatalKind::Timeout
    } else if error.is_context_overflow() {
        FatalKind::ContextOverflow
    } else {
        FatalKind::ApiError
    }
}

/// Free-text fallback for errors that only carry a message
pub fn is_timeout_message(message: &str) -> bool {
    TIMEOUT_PATTERN.is_match(message)
}

pub fn is_credential_message(message: &str) -> bool {
    CREDENTIAL_PATTERNS.iter().any(|re| re.is_match(message))
}

/// User-facing text for a fatal stop
pub fn fatal_message(kind: FatalKind, detail: &str) -> String {
    match kind {
        FatalKind::Timeout => format!(
            "The request timed out before an answer was found ({}). \
             Try a simpler question or raise the time limit.",
            detail
        ),
        FatalKind::ApiError => format!(
            "The language model request failed: {}. {}",
            detail, CONFIG_CHECK
        ),
        FatalKind::ContextOverflow => format!(
            "The conversation grew too long for the model ({}). \
             The history has been cleared; please ask again. {}",
            detail, CONFIG_CHECK
        ),
        FatalKind::Exhausted => format!(
            "I could not finish within the step limit. {}",
            detail
        ),
        FatalKind::Cancelled => "The request was cancelled.".to_string(),
    }
}
