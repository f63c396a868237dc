//! Completion client: prompt in, raw text out

use std::sync::Arc;

use askdb_ai::{Completer, Completion, CompletionBuilder, CompletionRequest};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;

/// Keeps the model from writing its own observations
pub const OBSERVATION_STOP: &str = "\nObservation:";

/// Per-request sampling options
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            stop: vec![OBSERVATION_STOP.to_string()],
        }
    }
}

/// Wraps a [`Completer`] with the loop's fixed options, streams deltas out
/// as events, and gives up when the run is cancelled.
pub struct CompletionClient {
    completer: Arc<dyn Completer>,
    options: CompletionOptions,
}

impl CompletionClient {
    pub fn new(completer: Arc<dyn Completer>, options: CompletionOptions) -> Self {
        Self { completer, options }
    }

    pub fn model_id(&self) -> &str {
        self.completer.model_id()
    }

    fn request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest {
            prompt,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            stop: self.options.stop.clone(),
        }
    }

    pub async fn complete(
        &self,
        prompt: String,
        iteration: u32,
        events: &broadcast::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> askdb_ai::Result<Completion> {
        let request = self.request(prompt);

        let collect = async {
            let mut stream = self.completer.stream(&request).await?;
            let mut builder = CompletionBuilder::new();
            while let Some(event) = stream.next().await {
                if let askdb_ai::CompletionEvent::TextDelta { ref delta } = event {
                    let _ = events.send(AgentEvent::CompletionDelta {
                        iteration,
                        delta: delta.clone(),
                    });
                }
                builder.process_event(&event);
                if event.is_terminal() {
                    break;
                }
            }
            builder.build()
        };

        tokio::select! {
            result = collect => result,
            _ = cancel.cancelled() => Err(askdb_ai::Error::Aborted),
        }
    }
}
