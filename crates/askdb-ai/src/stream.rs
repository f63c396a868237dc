//! Streaming event types and utilities

use crate::types::{Completion, StopReason, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a completion streams in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// The provider accepted the request
    Start { model: String },
    /// A chunk of generated text
    TextDelta { delta: String },
    /// Generation finished
    Done {
        stop_reason: StopReason,
        usage: Usage,
    },
    /// The stream broke after it was opened
    Error { message: String },
}

impl CompletionEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CompletionEvent::Done { .. } | CompletionEvent::Error { .. }
        )
    }
}

/// A stream of completion events
pub type CompletionEventStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

/// Accumulates streamed deltas into a [`Completion`]
#[derive(Debug, Default)]
pub struct CompletionBuilder {
    text: String,
    usage: Usage,
    stop_reason: Option<StopReason>,
    error: Option<String>,
}

impl CompletionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the accumulated state
    pub fn process_event(&mut self, event: &CompletionEvent) {
        match event {
            CompletionEvent::TextDelta { delta } => self.text.push_str(delta),
            CompletionEvent::Done { stop_reason, usage } => {
                self.stop_reason = Some(*stop_reason);
                self.usage = *usage;
            }
            CompletionEvent::Error { message } => self.error = Some(message.clone()),
            CompletionEvent::Start { .. } => {}
        }
    }

    /// Text received so far
    pub fn current_text(&self) -> &str {
        &self.text
    }

    /// Finish the completion. Mid-stream failures and streams that end
    /// without a `Done` event are errors.
    pub fn build(self) -> crate::Result<Completion> {
        if let Some(message) = self.error {
            return Err(crate::Error::Sse(message));
        }
        let stop_reason = self.stop_reason.ok_or_else(|| {
            crate::Error::UnexpectedResponse("stream ended without completion".into())
        })?;
        Ok(Completion {
            text: self.text,
            usage: self.usage,
            stop_reason,
        })
    }
}
