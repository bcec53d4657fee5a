//! Mapping between abstraction types and Anthropic-specific types

use crate::llm::core::types::{
    FinishReason, GenerateRequest, Message, MessageRole, StreamEvent, UsageMetadata,
};

use super::types::{
    ClaudeContentDelta, ClaudeMessage, ClaudeStreamEvent, MessagesRequest,
};

/// Convert our abstraction request to the Messages API format
pub fn to_messages_request(request: GenerateRequest) -> MessagesRequest {
    MessagesRequest {
        model: request.model,
        max_tokens: request.config.max_tokens,
        messages: request
            .messages
            .into_iter()
            .map(to_claude_message)
            .collect(),
        system: request.system,
        // The API accepts 0.0-1.0
        temperature: request.config.temperature.map(|t| t.clamp(0.0, 1.0)),
        top_p: request.config.top_p,
        stop_sequences: request.config.stop_sequences,
        stream: true,
    }
}

fn to_claude_message(message: Message) -> ClaudeMessage {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };
    ClaudeMessage {
        role: role.to_string(),
        content: message.content,
    }
}

/// Convert an Anthropic stream event to our abstraction's StreamEvent
///
/// Block boundaries, pings and message_stop carry nothing the callers need
/// and produce no events.
pub fn from_claude_event(
    event: ClaudeStreamEvent,
    accumulated_usage: &mut UsageMetadata,
) -> Vec<StreamEvent> {
    match event {
        ClaudeStreamEvent::MessageStart { message } => {
            *accumulated_usage =
                UsageMetadata::new(message.usage.input_tokens, message.usage.output_tokens);

            vec![StreamEvent::MessageStart {
                id: message.id,
                usage: *accumulated_usage,
            }]
        }
        ClaudeStreamEvent::ContentBlockDelta {
            delta: ClaudeContentDelta::TextDelta { text },
            ..
        } => vec![StreamEvent::TextDelta { text }],
        ClaudeStreamEvent::MessageDelta { delta, usage } => {
            // output_tokens in message_delta is cumulative
            if let Some(usage) = usage {
                *accumulated_usage =
                    UsageMetadata::new(accumulated_usage.input_tokens, usage.output_tokens);
            }

            match delta.stop_reason {
                Some(stop_reason) => vec![StreamEvent::MessageEnd {
                    finish_reason: FinishReason::from_stop_reason(&stop_reason),
                    usage: *accumulated_usage,
                }],
                None => vec![],
            }
        }
        ClaudeStreamEvent::Error { error } => vec![StreamEvent::Error {
            error: format!("{}: {}", error.error_type, error.message),
        }],
        ClaudeStreamEvent::ContentBlockStart { .. }
        | ClaudeStreamEvent::ContentBlockDelta { .. }
        | ClaudeStreamEvent::ContentBlockStop { .. }
        | ClaudeStreamEvent::MessageStop
        | ClaudeStreamEvent::Ping => vec![],
    }
}
