//! Provider trait for LLM implementations

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;

use super::{
    error::LlmError,
    types::{GenerateRequest, StreamEvent, UsageMetadata},
};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Main interface that all LLM provider implementations must satisfy
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream generate content from the LLM
    ///
    /// Returns once the provider accepted the request; the stream then yields
    /// the incremental response. Dropping the stream abandons the request.
    async fn stream_generate(&self, request: GenerateRequest) -> Result<EventStream, LlmError>;
}

/// A fully collected, non-streaming response
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: UsageMetadata,
}

/// Drain a stream into the final text and usage
pub async fn collect_completion(mut stream: EventStream) -> Result<Completion, LlmError> {
    let mut text = String::new();
    let mut usage = UsageMetadata::default();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::MessageStart { usage: start, .. } => usage = start,
            StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
            StreamEvent::MessageEnd { usage: end, .. } => usage = end,
            StreamEvent::Error { error } => return Err(LlmError::StreamError(error)),
        }
    }

    Ok(Completion { text, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::core::types::FinishReason;

    #[tokio::test]
    async fn test_collect_completion() {
        let events: Vec<Result<StreamEvent, LlmError>> = vec![
            Ok(StreamEvent::MessageStart {
                id: "msg_1".to_string(),
                usage: UsageMetadata::new(12, 0),
            }),
            Ok(StreamEvent::TextDelta {
                text: "Hello".to_string(),
            }),
            Ok(StreamEvent::TextDelta {
                text: " world".to_string(),
            }),
            Ok(StreamEvent::MessageEnd {
                finish_reason: FinishReason::EndTurn,
                usage: UsageMetadata::new(12, 3),
            }),
        ];
        let completion = collect_completion(Box::pin(futures::stream::iter(events)))
            .await
            .unwrap();
        assert_eq!(completion.text, "Hello world");
        assert_eq!(completion.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_collect_completion_error_event() {
        let events: Vec<Result<StreamEvent, LlmError>> = vec![Ok(StreamEvent::Error {
            error: "overloaded_error: Overloaded".to_string(),
        })];
        let err = collect_completion(Box::pin(futures::stream::iter(events)))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::StreamError(_)));
    }
}
