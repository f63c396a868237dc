//! Completion provider implementations

pub mod openai;

use crate::{Completion, CompletionBuilder, CompletionEventStream, CompletionRequest, Error, Result};
use async_trait::async_trait;
use futures::StreamExt;

/// Anything that can turn a prompt into text.
///
/// `stream` fails fast on connection-level problems (bad credentials, rate
/// limits, timeouts). Problems after the stream has opened arrive as
/// `CompletionEvent::Error`.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Stream a completion
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionEventStream>;

    /// Identifier of the model behind this completer
    fn model_id(&self) -> &str;

    /// Run a completion to the end and return the collected text
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut stream = self.stream(request).await?;
        let mut builder = CompletionBuilder::new();
        while let Some(event) = stream.next().await {
            builder.process_event(&event);
            if event.is_terminal() {
                break;
            }
        }
        builder.build()
    }
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
