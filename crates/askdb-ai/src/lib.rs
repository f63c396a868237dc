//! askdb-ai: text completion layer
//!
//! This crate turns a prompt string into generated text using an
//! OpenAI-compatible chat completions endpoint, streamed over SSE.

pub mod error;
pub mod providers;
pub mod retry;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{Completer, openai::OpenAIProvider};
pub use retry::{RetryConfig, Retrying};
pub use stream::{CompletionBuilder, CompletionEvent, CompletionEventStream};
pub use types::*;
