//! OpenAI-compatible Chat Completions provider

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::Completer,
    stream::{CompletionEvent, CompletionEventStream},
    types::{CompletionRequest, Model, StopReason, Usage},
};

/// OpenAI API client bound to one model
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: Model,
}

impl OpenAIProvider {
    /// Create a new provider. Local endpoints such as Ollama need no key.
    pub fn new(api_key: Option<String>, model: Model) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    /// Create from the provider's API key environment variable
    pub fn from_env(model: Model) -> Result<Self> {
        let api_key = match model.provider.api_key_env_var() {
            Some(var) => Some(std::env::var(var).map_err(|_| Error::InvalidApiKey)?),
            None => None,
        };
        Ok(Self::new(api_key, model))
    }

    /// Bound every request, including the time spent streaming the body
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(self)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(ref key) = self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| Error::InvalidConfig("API key contains invalid characters".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        for (key, value) in &self.model.headers {
            if let (Ok(name), Ok(val)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                headers.insert(name, val);
            }
        }
        Ok(headers)
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAIRequest {
        OpenAIRequest {
            model: self.model.id.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: if request.stop.is_empty() {
                None
            } else {
                Some(request.stop.clone())
            },
        }
    }
}

#[async_trait]
impl Completer for OpenAIProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionEventStream> {
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.model.base_url);

        let request_builder = self.client.post(&url).headers(self.headers()?).json(&body);
        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        // Surface status-code failures as typed errors before handing out the stream.
        let pending = match event_source.next().await {
            Some(Ok(Event::Open)) => None,
            Some(Ok(Event::Message(msg))) => Some(msg.data),
            Some(Err(e)) => {
                event_source.close();
                return Err(open_error(e).await);
            }
            None => return Err(Error::Sse("stream closed before opening".into())),
        };

        tracing::debug!(model = %self.model.id, %url, "completion stream opened");
        Ok(Box::pin(create_stream(
            event_source,
            self.model.id.clone(),
            pending,
        )))
    }

    fn model_id(&self) -> &str {
        &self.model.id
    }
}

async fn open_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            status_error(status.as_u16(), &body, retry_after)
        }
        reqwest_eventsource::Error::Transport(e) if e.is_timeout() => {
            Error::Timeout(e.to_string())
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

/// Map an HTTP failure status and its body onto a typed error
fn status_error(status: u16, body: &str, retry_after: Option<u64>) -> Error {
    let (error_type, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope
                .error
                .error_type
                .or(envelope.error.code)
                .unwrap_or_else(|| format!("http_{}", status)),
            envelope.error.message,
        ),
        Err(_) => (format!("http_{}", status), body.trim().to_string()),
    };

    match status {
        401 | 403 => Error::Auth(message),
        408 | 504 => Error::Timeout(message),
        429 if error_type != "insufficient_quota" => Error::RateLimited { retry_after },
        500..=599 => Error::api("server_error", message),
        _ => Error::api(error_type, message),
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: String,
    pending: Option<String>,
) -> impl futures::Stream<Item = CompletionEvent> {
    stream! {
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        yield CompletionEvent::Start { model };

        let mut pending = pending;
        loop {
            let data = match pending.take() {
                Some(data) => data,
                None => match event_source.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => msg.data,
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => break,
                    Some(Err(e)) => {
                        event_source.close();
                        yield CompletionEvent::Error {
                            message: format!("SSE error: {}", e),
                        };
                        return;
                    }
                },
            };

            if data == "[DONE]" {
                break;
            }

            match serde_json::from_str::<StreamChunk>(&data) {
                Ok(chunk) => {
                    for choice in &chunk.choices {
                        if let Some(ref content) = choice.delta.content {
                            if !content.is_empty() {
                                yield CompletionEvent::TextDelta {
                                    delta: content.clone(),
                                };
                            }
                        }
                        if let Some(ref reason) = choice.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref stream_usage) = chunk.usage {
                        usage.input = stream_usage.prompt_tokens;
                        usage.output = stream_usage.completion_tokens;
                    }
                }
                Err(e) => {
                    event_source.close();
                    yield CompletionEvent::Error {
                        message: format!("Failed to parse chunk: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        let stop_reason = match finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            _ => StopReason::Stop,
        };

        yield CompletionEvent::Done { stop_reason, usage };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
