//! Claude provider implementation
//!
//! Talks to the Anthropic Messages API directly with an API key and consumes
//! its SSE stream.

pub mod client;
pub mod mapper;
pub mod sse;
pub mod types;

pub use client::{ClaudeClient, API_VERSION, DEFAULT_BASE_URL};
