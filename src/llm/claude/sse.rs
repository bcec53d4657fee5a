//! Server-Sent Events (SSE) parser for Anthropic streaming responses

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

use crate::llm::core::error::LlmError;

use super::types::ClaudeStreamEvent;

/// Parse a byte stream as Anthropic SSE events
///
/// Events are separated by a blank line and carry their JSON payload on
/// `data:` lines:
///
/// ```text
/// event: content_block_delta
/// data: {"type":"content_block_delta",...}
///
/// ```
///
/// Bytes are buffered until a full event is available, so events and UTF-8
/// sequences may be split across network chunks.
pub fn parse_sse_stream<S>(
    byte_stream: S,
) -> Pin<Box<dyn Stream<Item = Result<ClaudeStreamEvent, LlmError>> + Send>>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let mut buffer = BytesMut::new();

    let event_stream = byte_stream.flat_map(move |chunk_result| {
        let chunk = match chunk_result {
            Ok(bytes) => bytes,
            Err(e) => {
                return futures::stream::iter(vec![Err(LlmError::StreamError(e.to_string()))]);
            }
        };
        buffer.extend_from_slice(&chunk);

        let mut events = Vec::new();
        while let Some((end, delimiter_len)) = find_event_boundary(&buffer) {
            let raw = buffer.split_to(end + delimiter_len);
            match std::str::from_utf8(&raw[..end]) {
                Ok(text) => {
                    if let Some(parsed) = parse_event(text) {
                        events.push(parsed);
                    }
                }
                Err(e) => events.push(Err(LlmError::StreamError(format!(
                    "Invalid UTF-8 in stream: {}",
                    e
                )))),
            }
        }

        futures::stream::iter(events)
    });

    Box::pin(event_stream)
}

/// Position of the first blank line and the length of the delimiter
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Parse a single SSE event from its text representation
fn parse_event(event_text: &str) -> Option<Result<ClaudeStreamEvent, LlmError>> {
    let mut event_type: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in event_text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    if data.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ClaudeStreamEvent>(&data) {
        Ok(event) => Some(Ok(event)),
        Err(e) => Some(Err(LlmError::SerializationError(format!(
            "Failed to parse SSE event (type: {:?}): {}. Data: {}",
            event_type, e, data
        )))),
    }
}
