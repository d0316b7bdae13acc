//! llmroute Error Types
//!
//! Error handling for routing, rate limiting and upstream calls.

use thiserror::Error;

/// Main error type for llmroute operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors (invalid JSON, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit string could not be parsed
    #[error("Invalid rate limit '{spec}': {reason}")]
    InvalidRateLimit { spec: String, reason: String },

    /// No prompt template stored under this path
    #[error("Prompt template '{0}' not found")]
    PromptNotFound(String),

    /// A prompt template already exists under this path
    #[error("Prompt template '{0}' already exists")]
    PromptExists(String),

    /// Variable substitution in a prompt template failed
    #[error("Template error: {0}")]
    Template(String),

    /// No provider instance is enabled
    #[error("No enabled provider instance. Enable at least one instance under `providers`.")]
    NoEnabledInstance,

    /// Provider kind has no client implementation
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Instance has no API keys configured
    #[error("No API keys available for '{0}'. Add `keys` or `keys_env` to the instance config")]
    NoKeysAvailable(String),

    /// Instance has no models configured and the request named none
    #[error("No models available for '{0}'. Add `models` to the instance config or set a model on the request")]
    NoModelsAvailable(String),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Upstream rejected the request with a rate limit
    #[error("Rate limited by '{provider}': {message}")]
    RateLimited { provider: String, message: String },

    /// Authentication failed
    #[error("Authentication failed: {0}. Check your API key.")]
    Auth(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// HTTP request failed
    #[error("Request failed: {0}")]
    Request(String),

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Response parsing failed
    #[error("Response error: {0}")]
    Response(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Whether a failed upstream attempt is worth repeating.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RouterError::Cancelled
                | RouterError::Config(_)
                | RouterError::InvalidRateLimit { .. }
                | RouterError::PromptNotFound(_)
                | RouterError::PromptExists(_)
                | RouterError::Template(_)
                | RouterError::NoEnabledInstance
                | RouterError::UnsupportedProvider(_)
                | RouterError::NoKeysAvailable(_)
                | RouterError::NoModelsAvailable(_)
        )
    }
}

impl From<reqwest::Error> for RouterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RouterError::Timeout(err.to_string())
        } else if err.is_connect() {
            RouterError::Request(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            RouterError::Response(format!("Failed to decode response: {}", err))
        } else {
            RouterError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Response(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for llmroute operations
pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RouterError::Upstream {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(RouterError::Timeout("slow".to_string()).is_retryable());
        assert!(!RouterError::Cancelled.is_retryable());
        assert!(!RouterError::NoKeysAvailable("openai:a".to_string()).is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = RouterError::InvalidRateLimit {
            spec: "abc".to_string(),
            reason: "expected <N>/<unit>".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid rate limit 'abc': expected <N>/<unit>"
        );
        assert_eq!(RouterError::Cancelled.to_string(), "Request cancelled");
    }
}
