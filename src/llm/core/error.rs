//! Error types for the LLM layer

use std::time::Duration;
use thiserror::Error;

use crate::error::ApiError;

/// Errors that can occur when using LLM providers
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// No API key configured
    #[error("LLM provider is not configured")]
    NotConfigured,

    /// API key rejected by the provider
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// HTTP request failures
    #[error("HTTP error (status {status}): {body}")]
    HttpError { status: u16, body: String },

    /// SSE stream parsing failures
    #[error("Stream error: {0}")]
    StreamError(String),

    /// JSON encoding/decoding issues
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded (retry after {retry_after:?})")]
    RateLimitExceeded { retry_after: Option<Duration> },

    /// Provider-specific errors
    #[error("Provider error ({code}): {message}")]
    ProviderError { code: String, message: String },
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::HttpError {
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            body: err.to_string(),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::NotConfigured => {
                ApiError::ServiceUnavailable("LLM service is not configured".to_string())
            }
            LlmError::RateLimitExceeded { retry_after } => ApiError::TooManyRequests {
                message: "LLM provider rate limit exceeded, please try again later".to_string(),
                retry_after_secs: retry_after.map(|d| d.as_secs().max(1)).unwrap_or(60),
            },
            LlmError::InvalidRequest(message) => ApiError::bad_request(message),
            other => ApiError::internal(other.to_string()),
        }
    }
}
