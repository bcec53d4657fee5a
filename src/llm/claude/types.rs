//! Anthropic Messages API request and stream types

use serde::{Deserialize, Serialize};

/// Body of `POST /v1/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    /// Maximum number of tokens to generate (required)
    pub max_tokens: u32,
    pub messages: Vec<ClaudeMessage>,
    /// System prompt (top-level field)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Temperature (0.0-1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Always true; responses are consumed as SSE
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaudeMessage {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

/// SSE event types from the streaming API
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamEvent {
    MessageStart {
        message: ClaudeMessageData,
    },
    ContentBlockStart {
        index: usize,
        content_block: ClaudeContentBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ClaudeContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    /// Carries the stop reason and cumulative output usage
    MessageDelta {
        delta: ClaudeMessageDeltaData,
        usage: Option<ClaudeUsage>,
    },
    MessageStop,
    /// Keep-alive
    Ping,
    Error {
        error: ClaudeErrorData,
    },
}

/// Message data from message_start event
#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessageData {
    pub id: String,
    pub role: String,
    pub model: String,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContentBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    /// Block kinds this client does not request (tool use, thinking)
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeContentDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessageDeltaData {
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeUsage {
    /// Not present in message_delta updates
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeErrorData {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Body of a non-2xx response
#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeErrorResponse {
    pub error: ClaudeErrorData,
}
