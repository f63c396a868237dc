//! Scripted completers and stub tools for unit tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use askdb_ai::{
    Completer, CompletionEvent, CompletionEventStream, CompletionRequest, StopReason, Usage,
};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::tool::{Tool, ToolError, ToolOutput};

pub(crate) enum Reply {
    Text(String),
    Fail(fn() -> askdb_ai::Error),
}

/// Answers each request with the next scripted reply and records prompts
pub(crate) struct ScriptedCompleter {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicU32,
}

impl ScriptedCompleter {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn texts(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| Reply::Text(t.to_string())).collect())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn stream(&self, request: &CompletionRequest) -> askdb_ai::Result<CompletionEventStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());

        let text = match self.replies.lock().pop_front() {
            Some(Reply::Text(text)) => text,
            Some(Reply::Fail(make_error)) => return Err(make_error()),
            None => "Final Answer: script exhausted".to_string(),
        };

        Ok(Box::pin(futures::stream::iter(vec![
            CompletionEvent::Start {
                model: "scripted".into(),
            },
            CompletionEvent::TextDelta { delta: text },
            CompletionEvent::Done {
                stop_reason: StopReason::Stop,
                usage: Usage::default(),
            },
        ])))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// Tool with a fixed reply
pub(crate) struct StubTool {
    name: &'static str,
    reply: Result<String, ToolError>,
    delay: Option<Duration>,
    calls: AtomicU32,
    inputs: Mutex<Vec<String>>,
}

impl StubTool {
    pub fn ok(name: &'static str, text: &str) -> Arc<Self> {
        Self::build(name, Ok(text.to_string()), None)
    }

    pub fn err(name: &'static str, error: ToolError) -> Arc<Self> {
        Self::build(name, Err(error), None)
    }

    pub fn slow(name: &'static str, text: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, Ok(text.to_string()), Some(delay))
    }

    fn build(name: &'static str, reply: Result<String, ToolError>, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply,
            delay,
            calls: AtomicU32::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "stub"
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone().map(ToolOutput::text)
    }
}
