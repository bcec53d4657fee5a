//! Anthropic Messages API client

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::llm::core::{
    error::LlmError,
    provider::{EventStream, LlmProvider},
    types::{GenerateRequest, StreamEvent, UsageMetadata},
};

use super::mapper::{from_claude_event, to_messages_request};
use super::sse::parse_sse_stream;
use super::types::ClaudeErrorResponse;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const API_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API
pub struct ClaudeClient {
    http_client: Client,
    api_key: String,
    /// Scheme and host, without a trailing slash
    base_url: String,
}

impl ClaudeClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::HttpError {
                status: 0,
                body: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    async fn make_streaming_request(&self, request: GenerateRequest) -> Result<EventStream, LlmError> {
        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest(
                "At least one message is required".to_string(),
            ));
        }

        let body = to_messages_request(request);
        debug!(model = %body.model, messages = body.messages.len(), "Sending messages request");

        let response = self
            .http_client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Anthropic API returned an error");
            return Err(error_from_status(status, text, retry_after));
        }

        let sse_stream = parse_sse_stream(response.bytes_stream());

        let mut accumulated_usage = UsageMetadata::default();
        let event_stream = sse_stream.flat_map(move |result| {
            let events: Vec<Result<StreamEvent, LlmError>> = match result {
                Ok(event) => from_claude_event(event, &mut accumulated_usage)
                    .into_iter()
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(events)
        });

        Ok(Box::pin(event_stream))
    }
}

/// Classify a non-2xx response
fn error_from_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> LlmError {
    let parsed = serde_json::from_str::<ClaudeErrorResponse>(&body).ok();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthenticationError(
            parsed.map(|p| p.error.message).unwrap_or(body),
        ),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimitExceeded { retry_after },
        StatusCode::BAD_REQUEST => {
            LlmError::InvalidRequest(parsed.map(|p| p.error.message).unwrap_or(body))
        }
        _ => match parsed {
            Some(p) => LlmError::ProviderError {
                code: p.error.error_type,
                message: p.error.message,
            },
            None => LlmError::HttpError {
                status: status.as_u16(),
                body,
            },
        },
    }
}

#[async_trait]
impl LlmProvider for ClaudeClient {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<EventStream, LlmError> {
        self.make_streaming_request(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_url_trims_trailing_slash() {
        let client = ClaudeClient::new("key", "https://api.anthropic.com/").unwrap();
        assert_eq!(client.messages_url(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn test_error_from_status() {
        let auth = error_from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#
                .to_string(),
            None,
        );
        match auth {
            LlmError::AuthenticationError(message) => assert_eq!(message, "invalid x-api-key"),
            other => panic!("unexpected: {:?}", other),
        }

        let limited = error_from_status(
            StatusCode::TOO_MANY_REQUESTS,
            String::new(),
            Some(Duration::from_secs(12)),
        );
        assert!(matches!(
            limited,
            LlmError::RateLimitExceeded {
                retry_after: Some(d)
            } if d.as_secs() == 12
        ));

        let overloaded = error_from_status(
            StatusCode::from_u16(529).unwrap(),
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
                .to_string(),
            None,
        );
        assert!(matches!(overloaded, LlmError::ProviderError { ref code, .. } if code == "overloaded_error"));

        let gateway = error_from_status(StatusCode::BAD_GATEWAY, "<html>".to_string(), None);
        assert!(matches!(gateway, LlmError::HttpError { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_empty_messages_rejected_before_sending() {
        let client = ClaudeClient::new("key", "http://127.0.0.1:9").unwrap();
        let result = client
            .stream_generate(GenerateRequest {
                model: "m".to_string(),
                messages: vec![],
                config: Default::default(),
                system: None,
            })
            .await;
        assert!(matches!(result, Err(LlmError::InvalidRequest(_))));
    }
}
