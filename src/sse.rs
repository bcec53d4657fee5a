// Server-Sent Events framing for chat replies

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures_util::stream::{Stream, StreamExt};
use warp::sse::Event;

use crate::llm::ChatEvent;

/// Encode a chat event as an unnamed SSE event carrying its JSON payload
///
/// Clients read every frame from the default `message` channel and switch on
/// the `type` field.
pub fn chat_event(event: &ChatEvent) -> Result<Event, Infallible> {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| {
        r#"{"type":"error","error":"Failed to encode event"}"#.to_string()
    });
    Ok(Event::default().data(payload))
}

/// Frame a chat stream for `warp::sse::reply`
pub fn chat_events<S>(events: S) -> impl Stream<Item = Result<Event, Infallible>> + Send
where
    S: Stream<Item = ChatEvent> + Send,
{
    events.map(|event| chat_event(&event))
}

/// `warp::sse::reply` requires `Sync`; this adapter provides it for a
/// `Send`-only stream. Polling goes through `&mut`, so the mutex is never locked.
pub struct SyncStream<S>(Mutex<S>);

impl<S> SyncStream<S> {
    pub fn new(stream: S) -> Self {
        SyncStream(Mutex::new(stream))
    }
}

impl<S: Stream + Unpin> Stream for SyncStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = self.get_mut().0.get_mut().unwrap_or_else(|e| e.into_inner());
        Pin::new(inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_chunk_event_frame() {
        let event = chat_event(&ChatEvent::Chunk {
            content: "Hello".to_string(),
        })
        .unwrap()
        .to_string();
        assert!(event.starts_with("data:"));
        assert!(event.contains("{\"type\":\"chunk\",\"content\":\"Hello\"}"));
        assert!(event.ends_with("\n\n"));
    }

    #[test]
    fn test_complete_event_frame() {
        let id = Uuid::nil();
        let frame = chat_event(&ChatEvent::Complete {
            conversation_id: id,
            message_id: id,
        })
        .unwrap()
        .to_string();
        assert!(frame.starts_with("data:{\"type\":\"complete\""));
        assert!(frame.contains("\"conversationId\":\"00000000-0000-0000-0000-000000000000\""));
        assert!(frame.contains("\"messageId\""));
    }

    #[tokio::test]
    async fn test_chat_events_preserves_order() {
        let events = futures_util::stream::iter(vec![
            ChatEvent::Chunk {
                content: "a".to_string(),
            },
            ChatEvent::Error {
                error: "Failed to send streaming message".to_string(),
            },
        ]);
        let frames: Vec<String> = chat_events(events)
            .map(|e| e.unwrap().to_string())
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains("\"type\":\"error\""));
    }
}
