//! Error types for askdb-ai

use thiserror::Error;

/// Result type alias using askdb-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when requesting a completion
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// The provider did not answer in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Context overflow / too many tokens
    #[error("Context overflow: {0}")]
    ContextOverflow(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Timeouts go straight back to the caller
            Error::Http(e) => !e.is_builder() && !e.is_decode() && !e.is_timeout(),
            Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("overloaded")
                    || et.contains("server_error")
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Check if the provider rejected our credentials
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Auth(_) | Error::InvalidApiKey => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("authentication")
                    || et.contains("invalid_api_key")
                    || msg.contains("incorrect api key")
                    || msg.contains("invalid api key")
            }
            _ => false,
        }
    }

    /// Check if this error is a timeout, either ours or the provider's
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error indicates a context overflow / too many tokens
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Error::ContextOverflow(_) => true,
            Error::Api { message, .. } => {
                let msg = message.to_lowercase();
                msg.contains("too many tokens")
                    || msg.contains("context length")
                    || msg.contains("context window")
                    || msg.contains("token limit")
                    || msg.contains("prompt is too long")
                    || msg.contains("request too large")
                    || msg.contains("reduce the length")
                    || msg.contains("context_length_exceeded")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_timeout_not_retryable() {
        let err = Error::Timeout("no response after 120s".into());
        assert!(err.is_timeout());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_api_rate_limit() {
        assert!(Error::api("rate_limit_error", "slow down").is_retryable());
        assert!(Error::api("error", "Too many requests").is_retryable());
        assert!(Error::api("server_error", "The server had an error").is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::Aborted.is_retryable());
        assert!(!Error::Auth("bad key".into()).is_retryable());
        assert!(!Error::api("invalid_request_error", "unknown model").is_retryable());
    }

    #[test]
    fn test_auth_detection() {
        assert!(Error::Auth("401".into()).is_auth());
        assert!(Error::InvalidApiKey.is_auth());
        assert!(Error::api("invalid_api_key", "Incorrect API key provided: sk-abc").is_auth());
        assert!(!Error::api("invalid_request_error", "bad model").is_auth());
    }

    #[test]
    fn test_timeout_detection() {
        assert!(Error::Timeout("slow".into()).is_timeout());
        assert!(!Error::Sse("closed".into()).is_timeout());
    }

    #[test]
    fn test_overflow_detection() {
        assert!(Error::ContextOverflow("too big".into()).is_context_overflow());
        let e = Error::api(
            "invalid_request_error",
            "This model's maximum context length is 16385 tokens. context_length_exceeded",
        );
        assert!(e.is_context_overflow());
        assert!(!Error::api("authentication_error", "Invalid API key").is_context_overflow());
        assert!(!Error::RateLimited { retry_after: None }.is_context_overflow());
    }
}
