//! Core types for text completion

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::Error;

/// Known OpenAI-compatible providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Groq,
    OpenRouter,
    Ollama,
    Custom,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Groq => "Groq",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    /// Chat completions base URL used when none is configured
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI | Provider::Custom => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Ollama => "http://localhost:11434/v1",
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "groq" => Ok(Provider::Groq),
            "openrouter" => Ok(Provider::OpenRouter),
            "ollama" => Ok(Provider::Ollama),
            "custom" => Ok(Provider::Custom),
            other => Err(Error::InvalidConfig(format!("unknown provider '{}'", other))),
        }
    }
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "gpt-4o-mini")
    pub id: String,
    /// Provider
    pub provider: Provider,
    /// Base URL for API calls
    pub base_url: String,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// Build a model on the provider's default endpoint
    pub fn new(id: impl Into<String>, provider: Provider) -> Self {
        Self {
            id: id.into(),
            provider,
            base_url: provider.default_base_url().to_string(),
            headers: HashMap::new(),
        }
    }

    /// Override the endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u32,
    pub output: u32,
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response or a stop sequence was hit
    Stop,
    /// Maximum tokens reached
    Length,
    /// Request was aborted
    Aborted,
}

/// A single prompt-in, text-out request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Sampling temperature. The reasoning loop always uses 0.
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Generation halts before any of these strings
    #[serde(default)]
    pub stop: Vec<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: None,
            stop: Vec::new(),
        }
    }
}

/// Generated text plus accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
}
