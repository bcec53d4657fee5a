//! Conversation persistence around the LLM provider
//!
//! [`ChatService`] owns the conversation lifecycle:
//! - Loads the history of a conversation and appends the new user turn
//! - Calls the provider and streams the reply back as [`ChatEvent`]s
//! - Persists both turns and adds token usage and cost to the conversation

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use chrono::{Duration, Utc};
use futures::stream::Stream;
use futures::StreamExt;
use pin_utils::pin_mut;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::Store;
use crate::error::ApiError;
use crate::llm::catalog;
use crate::llm::core::{
    config::{GenerationConfig, DEFAULT_MAX_TOKENS, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE},
    error::LlmError,
    provider::{collect_completion, LlmProvider},
    types::{GenerateRequest, Message, StreamEvent, UsageMetadata},
};
use crate::models::{
    ChatMessage, ChatRole, Conversation, ConversationSummary, NewChatMessage, NewConversation,
    Page,
};

/// Per-message generation overrides
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl ChatOptions {
    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig::new(self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
            .with_temperature(self.temperature.unwrap_or(DEFAULT_TEMPERATURE))
    }

    fn system(&self) -> String {
        self.system_prompt
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }
}

/// Result of a non-streaming exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub message: String,
    /// Output tokens of the reply
    pub tokens: i32,
    pub cost: f64,
}

/// Events of a streaming exchange, in the order they are produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Chunk {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    Error {
        error: String,
    },
}

pub type ChatStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub period: String,
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    /// `None` when no API key is configured
    provider: Option<Arc<dyn LlmProvider>>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>, provider: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { store, provider }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<Arc<dyn LlmProvider>, ApiError> {
        self.provider
            .clone()
            .ok_or_else(|| LlmError::NotConfigured.into())
    }

    pub async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
        model: Option<String>,
    ) -> Result<Conversation, ApiError> {
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Conversation {}", Utc::now().format("%Y-%m-%d")));
        let model = model.unwrap_or_else(|| catalog::DEFAULT_MODEL.to_string());

        let conversation = self
            .store
            .create_conversation(NewConversation {
                user_id,
                title,
                model,
            })
            .await?;

        info!(
            conversation_id = %conversation.id,
            user_id = %user_id,
            model = %conversation.model,
            "Created LLM conversation"
        );
        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        Ok(self.store.list_conversations(user_id, page).await?)
    }

    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ConversationDetail, ApiError> {
        let conversation = self.owned(conversation_id, user_id).await?;
        let messages = self.store.list_messages(conversation_id).await?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    pub async fn update_title(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        title: &str,
    ) -> Result<Conversation, ApiError> {
        self.owned(conversation_id, user_id).await?;
        Ok(self
            .store
            .update_conversation_title(conversation_id, title)
            .await?)
    }

    pub async fn delete_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ApiError> {
        self.owned(conversation_id, user_id).await?;
        self.store.delete_conversation(conversation_id).await?;
        info!(conversation_id = %conversation_id, user_id = %user_id, "Deleted LLM conversation");
        Ok(())
    }

    /// Aggregate usage over conversations created in the last `days` days
    pub async fn usage_stats(&self, user_id: Uuid, days: u32) -> Result<UsageStats, ApiError> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let totals = self.store.usage_totals(user_id, since).await?;
        Ok(UsageStats {
            total_conversations: totals.conversations,
            total_messages: totals.messages,
            total_tokens: totals.tokens,
            total_cost: totals.cost,
            period: format!("{} days", days),
        })
    }

    /// Send a message and wait for the complete reply
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        content: &str,
        options: ChatOptions,
    ) -> Result<ChatReply, ApiError> {
        let provider = self.provider()?;
        let (conversation, request) = self
            .prepare(conversation_id, user_id, content, &options)
            .await?;

        let completion = match provider.stream_generate(request).await {
            Ok(stream) => collect_completion(stream).await,
            Err(e) => Err(e),
        }
        .map_err(|e| {
            error!(conversation_id = %conversation_id, user_id = %user_id, error = %e, "Failed to send LLM message");
            ApiError::from(e)
        })?;

        let usage = completion.usage;
        let cost = catalog::cost(&conversation.model, usage.input_tokens, usage.output_tokens);
        let tokens = i32::try_from(usage.output_tokens).unwrap_or(i32::MAX);

        self.store
            .insert_message(NewChatMessage {
                conversation_id,
                role: ChatRole::Assistant,
                content: completion.text.clone(),
                tokens,
                cost,
            })
            .await?;
        self.store
            .add_conversation_usage(conversation_id, i64::from(usage.total_tokens), cost)
            .await?;

        info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost,
            model = %conversation.model,
            "LLM message processed"
        );

        Ok(ChatReply {
            message: completion.text,
            tokens,
            cost,
        })
    }

    /// Send a message and stream the reply
    ///
    /// Ownership and configuration are checked before anything is returned.
    /// From then on every failure is reported in-band as [`ChatEvent::Error`].
    /// Dropping the stream abandons the provider request.
    pub async fn stream_message(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        content: &str,
        options: ChatOptions,
    ) -> Result<ChatStream, ApiError> {
        let provider = self.provider()?;
        let (conversation, request) = self
            .prepare(conversation_id, user_id, content, &options)
            .await?;

        // Placeholder row, finalised once the stream completes
        let placeholder = self
            .store
            .insert_message(NewChatMessage {
                conversation_id,
                role: ChatRole::Assistant,
                content: String::new(),
                tokens: 0,
                cost: 0.0,
            })
            .await?;

        let store = self.store.clone();
        let model = conversation.model;
        let message_id = placeholder.id;

        Ok(Box::pin(stream! {
            let llm_stream = match provider.stream_generate(request).await {
                Ok(s) => s,
                Err(e) => {
                    error!(conversation_id = %conversation_id, error = %e, "Failed to start LLM stream");
                    yield stream_error(&e);
                    return;
                }
            };
            pin_mut!(llm_stream);

            let mut full_content = String::new();
            let mut usage = UsageMetadata::default();

            while let Some(event) = llm_stream.next().await {
                match event {
                    Ok(StreamEvent::TextDelta { text }) => {
                        full_content.push_str(&text);
                        yield ChatEvent::Chunk { content: text };
                    }
                    Ok(StreamEvent::MessageStart { usage: start, .. }) => usage = start,
                    Ok(StreamEvent::MessageEnd { usage: end, .. }) => {
                        usage = end;
                        break;
                    }
                    Ok(StreamEvent::Error { error }) => {
                        error!(conversation_id = %conversation_id, error = %error, "LLM stream reported an error");
                        yield stream_error(&LlmError::StreamError(error));
                        return;
                    }
                    Err(e) => {
                        error!(conversation_id = %conversation_id, error = %e, "LLM stream failed");
                        yield stream_error(&e);
                        return;
                    }
                }
            }

            let cost = catalog::cost(&model, usage.input_tokens, usage.output_tokens);
            let tokens = i32::try_from(usage.output_tokens).unwrap_or(i32::MAX);

            let persisted = async {
                store.update_message(message_id, &full_content, tokens, cost).await?;
                store
                    .add_conversation_usage(conversation_id, i64::from(usage.total_tokens), cost)
                    .await
            }
            .await;

            match persisted {
                Ok(()) => {
                    info!(
                        conversation_id = %conversation_id,
                        user_id = %user_id,
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        cost,
                        model = %model,
                        "LLM streaming message processed"
                    );
                    yield ChatEvent::Complete { conversation_id, message_id };
                }
                Err(e) => {
                    error!(conversation_id = %conversation_id, error = %e, "Failed to persist streamed reply");
                    yield ChatEvent::Error { error: "Failed to send streaming message".to_string() };
                }
            }
        }))
    }

    async fn owned(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation, ApiError> {
        self.store
            .find_conversation(conversation_id, user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Conversation not found"))
    }

    /// Build the provider request from stored history plus the new turn, and
    /// persist the user message
    async fn prepare(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        content: &str,
        options: &ChatOptions,
    ) -> Result<(Conversation, GenerateRequest), ApiError> {
        let conversation = self.owned(conversation_id, user_id).await?;

        // Empty rows are placeholders of abandoned streams
        let mut messages: Vec<Message> = self
            .store
            .list_messages(conversation_id)
            .await?
            .into_iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| Message {
                role: m.role.into(),
                content: m.content,
            })
            .collect();
        messages.push(Message::user(content));

        self.store
            .insert_message(NewChatMessage {
                conversation_id,
                role: ChatRole::User,
                content: content.to_string(),
                tokens: 0,
                cost: 0.0,
            })
            .await?;

        let request = GenerateRequest {
            model: conversation.model.clone(),
            messages,
            config: options.generation_config(),
            system: Some(options.system()),
        };
        Ok((conversation, request))
    }
}

/// Client-facing message for a failed stream
fn stream_error(err: &LlmError) -> ChatEvent {
    let error = match err {
        LlmError::RateLimitExceeded { .. } => {
            "LLM provider rate limit exceeded, please try again later".to_string()
        }
        LlmError::NotConfigured => "LLM service is not configured".to_string(),
        _ => "Failed to send streaming message".to_string(),
    };
    ChatEvent::Error { error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::llm::core::{provider::EventStream, types::FinishReason};
    use crate::models::{NewUser, UserRole};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays a fixed reply and records the requests it receives
    struct Scripted {
        reply: Vec<&'static str>,
        fail: bool,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl Scripted {
        fn new(reply: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                fail: false,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: vec![],
                fail: true,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn stream_generate(&self, request: GenerateRequest) -> Result<EventStream, LlmError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(LlmError::HttpError {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let mut events = vec![Ok(StreamEvent::MessageStart {
                id: "msg_1".to_string(),
                usage: UsageMetadata::new(1000, 0),
            })];
            for chunk in &self.reply {
                events.push(Ok(StreamEvent::TextDelta {
                    text: chunk.to_string(),
                }));
            }
            events.push(Ok(StreamEvent::MessageEnd {
                finish_reason: FinishReason::EndTurn,
                usage: UsageMetadata::new(1000, 500),
            }));
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    async fn setup(provider: Option<Arc<dyn LlmProvider>>) -> (ChatService, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user(NewUser {
                email: "chat@example.com".to_string(),
                password_hash: "x".to_string(),
                first_name: None,
                last_name: None,
                role: UserRole::User,
            })
            .await
            .unwrap();
        (ChatService::new(store.clone(), provider), store, user.id)
    }

    #[tokio::test]
    async fn test_create_conversation_defaults() {
        let (service, _, user_id) = setup(None).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();
        assert_eq!(conversation.model, catalog::DEFAULT_MODEL);
        assert_eq!(
            conversation.title,
            format!("Conversation {}", Utc::now().format("%Y-%m-%d"))
        );
    }

    #[tokio::test]
    async fn test_other_users_conversation_is_not_found() {
        let (service, _, user_id) = setup(None).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();
        let err = service
            .get_conversation(conversation.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_send_message_persists_and_accounts() {
        let provider = Scripted::new(vec!["Hello", " there"]);
        let (service, _, user_id) = setup(Some(provider.clone() as Arc<dyn LlmProvider>)).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();

        let reply = service
            .send_message(conversation.id, user_id, "Hi", ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.message, "Hello there");
        assert_eq!(reply.tokens, 500);
        assert_eq!(reply.cost, 0.0105);

        let detail = service.get_conversation(conversation.id, user_id).await.unwrap();
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[0].role, ChatRole::User);
        assert_eq!(detail.messages[1].content, "Hello there");
        assert_eq!(detail.conversation.total_tokens, 1500);

        let request = provider.requests.lock().unwrap()[0].clone();
        assert_eq!(request.system.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(request.config.max_tokens, 2048);
        assert_eq!(request.config.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn test_history_is_sent_with_new_turn() {
        let provider = Scripted::new(vec!["ok"]);
        let (service, _, user_id) = setup(Some(provider.clone() as Arc<dyn LlmProvider>)).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();

        service
            .send_message(conversation.id, user_id, "first", ChatOptions::default())
            .await
            .unwrap();
        service
            .send_message(conversation.id, user_id, "second", ChatOptions::default())
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        let contents: Vec<_> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "ok", "second"]);
    }

    #[tokio::test]
    async fn test_stream_message_events() {
        let provider = Scripted::new(vec!["A", "B"]);
        let (service, store, user_id) = setup(Some(provider as Arc<dyn LlmProvider>)).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();

        let events: Vec<ChatEvent> = service
            .stream_message(conversation.id, user_id, "Hi", ChatOptions::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ChatEvent::Chunk { content: "A".to_string() });
        let message_id = match &events[2] {
            ChatEvent::Complete {
                conversation_id,
                message_id,
            } => {
                assert_eq!(*conversation_id, conversation.id);
                *message_id
            }
            other => panic!("expected complete, got {:?}", other),
        };

        let messages = store.list_messages(conversation.id).await.unwrap();
        let reply = messages.iter().find(|m| m.id == message_id).unwrap();
        assert_eq!(reply.content, "AB");
        assert_eq!(reply.tokens, 500);
    }

    #[tokio::test]
    async fn test_stream_provider_failure_is_reported_in_band() {
        let (service, _, user_id) = setup(Some(Scripted::failing() as Arc<dyn LlmProvider>)).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();

        let events: Vec<ChatEvent> = service
            .stream_message(conversation.id, user_id, "Hi", ChatOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![ChatEvent::Error {
                error: "Failed to send streaming message".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let (service, _, user_id) = setup(None).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();
        let err = service
            .send_message(conversation.id, user_id, "Hi", ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_usage_stats_period() {
        let provider = Scripted::new(vec!["x"]);
        let (service, _, user_id) = setup(Some(provider as Arc<dyn LlmProvider>)).await;
        let conversation = service.create_conversation(user_id, None, None).await.unwrap();
        service
            .send_message(conversation.id, user_id, "Hi", ChatOptions::default())
            .await
            .unwrap();

        let stats = service.usage_stats(user_id, 7).await.unwrap();
        assert_eq!(stats.period, "7 days");
        assert_eq!(stats.total_conversations, 1);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.total_tokens, 1500);
    }

    #[test]
    fn test_chat_event_serialization() {
        let id = Uuid::nil();
        let json = serde_json::to_value(ChatEvent::Complete {
            conversation_id: id,
            message_id: id,
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert!(json.get("conversationId").is_some());
        let chunk = serde_json::to_string(&ChatEvent::Chunk {
            content: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(chunk, r#"{"type":"chunk","content":"hi"}"#);
    }
}
