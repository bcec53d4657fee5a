//! Provider-neutral request and stream types

use serde::{Deserialize, Serialize};

use super::config::GenerationConfig;
use crate::models::ChatRole;

/// Request to generate a completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier understood by the provider
    pub model: String,
    /// Conversation history, oldest first, ending with the user turn
    pub messages: Vec<Message>,
    /// Generation parameters
    pub config: GenerationConfig,
    /// System prompt
    pub system: Option<String>,
}

/// A single turn in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl From<ChatRole> for MessageRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::User => MessageRole::User,
            ChatRole::Assistant => MessageRole::Assistant,
        }
    }
}

/// Events emitted during streaming generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Response begins; usage holds the prompt tokens
    MessageStart { id: String, usage: UsageMetadata },
    /// Text token(s)
    TextDelta { text: String },
    /// Response complete with final usage
    MessageEnd {
        finish_reason: FinishReason,
        usage: UsageMetadata,
    },
    /// Provider reported an error mid-stream
    Error { error: String },
}

/// Reason why generation finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    Other(String),
}

impl FinishReason {
    pub fn from_stop_reason(reason: &str) -> Self {
        match reason {
            "end_turn" => FinishReason::EndTurn,
            "max_tokens" => FinishReason::MaxTokens,
            "stop_sequence" => FinishReason::StopSequence,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl UsageMetadata {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("Hello").role, MessageRole::User);
        let msg = Message::assistant("Hi there");
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.content, "Hi there");
    }

    #[test]
    fn test_role_from_chat_role() {
        assert_eq!(MessageRole::from(ChatRole::User), MessageRole::User);
        assert_eq!(
            MessageRole::from(ChatRole::Assistant),
            MessageRole::Assistant
        );
    }

    #[test]
    fn test_usage_metadata_new() {
        let usage = UsageMetadata::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_finish_reason_from_stop_reason() {
        assert_eq!(FinishReason::from_stop_reason("end_turn"), FinishReason::EndTurn);
        assert_eq!(
            FinishReason::from_stop_reason("max_tokens"),
            FinishReason::MaxTokens
        );
        assert_eq!(
            FinishReason::from_stop_reason("refusal"),
            FinishReason::Other("refusal".to_string())
        );
    }

    #[test]
    fn test_stream_event_serialization() {
        let json = serde_json::to_string(&StreamEvent::TextDelta {
            text: "Hi".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"text_delta","text":"Hi"}"#);
    }
}
