//! LLM proxy
//!
//! A provider abstraction (`core`), its Anthropic implementation (`claude`),
//! the priced model catalog and the conversation service built on top.

pub mod catalog;
pub mod claude;
pub mod core;
pub mod service;

pub use self::core::{
    config::GenerationConfig,
    error::LlmError,
    provider::{collect_completion, Completion, EventStream, LlmProvider},
    types::{FinishReason, GenerateRequest, Message, MessageRole, StreamEvent, UsageMetadata},
};
pub use service::{
    ChatEvent, ChatOptions, ChatReply, ChatService, ChatStream, ConversationDetail, UsageStats,
};
