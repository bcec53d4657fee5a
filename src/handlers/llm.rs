// /api/llm handlers

use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;
use warp::reply::Response;
use warp::{Rejection, Reply};

use crate::error::ApiError;
use crate::filters::AuthUser;
use crate::handlers::{created, message, ok, paginated};
use crate::llm::{catalog, ChatOptions};
use crate::models::Page;
use crate::sse::{chat_events, SyncStream};
use crate::state::AppState;
use crate::validation::Validator;

const DEFAULT_PAGE_SIZE: i64 = 50;
const DEFAULT_USAGE_DAYS: u32 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
}

fn title_ok(title: &str) -> bool {
    (1..=200).contains(&title.chars().count())
}

impl CreateConversationRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let mut v = Validator::new();
        if let Some(title) = self.title.as_deref() {
            v.check(
                "title",
                title_ok(title),
                "Title must be a string between 1 and 200 characters",
            );
        }
        if let Some(model) = self.model.as_deref() {
            v.check("model", catalog::is_known(model), "Invalid model specified");
        }
        v.finish_joined()
    }
}

impl SendMessageRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let mut v = Validator::new();
        let content_len = self.content.as_deref().map_or(0, |c| c.chars().count());
        v.check(
            "content",
            (1..=10_000).contains(&content_len),
            "Message content must be between 1 and 10000 characters",
        );
        if let Some(temperature) = self.temperature {
            v.check(
                "temperature",
                (0.0..=2.0).contains(&temperature),
                "Temperature must be between 0 and 2",
            );
        }
        if let Some(max_tokens) = self.max_tokens {
            v.check(
                "maxTokens",
                (1..=8192).contains(&max_tokens),
                "Max tokens must be between 1 and 8192",
            );
        }
        if let Some(prompt) = self.system_prompt.as_deref() {
            v.check(
                "systemPrompt",
                prompt.chars().count() <= 2000,
                "System prompt must be at most 2000 characters",
            );
        }
        v.finish_joined()
    }
}

/// Optional integer query parameter; present but unparseable is an error
fn query_int(
    v: &mut Validator,
    query: &HashMap<String, String>,
    key: &str,
    range: std::ops::RangeInclusive<i64>,
    message: &str,
) -> Option<i64> {
    let raw = query.get(key)?;
    match raw.parse::<i64>() {
        Ok(value) if range.contains(&value) => Some(value),
        _ => {
            v.check(key, false, message);
            None
        }
    }
}

/// Parse `limit`/`offset` for the conversation list
pub fn page_from_query(query: &HashMap<String, String>) -> Result<Page, ApiError> {
    let mut v = Validator::new();
    let limit = query_int(
        &mut v,
        query,
        "limit",
        1..=100,
        "Limit must be between 1 and 100",
    );
    let offset = query_int(
        &mut v,
        query,
        "offset",
        0..=i64::MAX,
        "Offset must be a non-negative integer",
    );
    v.finish_joined()?;
    Ok(Page::new(
        limit.unwrap_or(DEFAULT_PAGE_SIZE),
        offset.unwrap_or(0),
    ))
}

/// Parse `days` for usage stats
pub fn days_from_query(query: &HashMap<String, String>) -> Result<u32, ApiError> {
    let mut v = Validator::new();
    let days = query_int(&mut v, query, "days", 1..=365, "Days must be between 1 and 365");
    v.finish_joined()?;
    Ok(days
        .and_then(|d| u32::try_from(d).ok())
        .unwrap_or(DEFAULT_USAGE_DAYS))
}

// POST /api/llm/conversations
pub async fn create_conversation_handler(
    auth: AuthUser,
    body: CreateConversationRequest,
    state: AppState,
) -> Result<Response, Rejection> {
    body.validate()?;
    let conversation = state
        .chat
        .create_conversation(auth.user.id, body.title, body.model)
        .await?;
    Ok(created(None, conversation))
}

// GET /api/llm/conversations
pub async fn list_conversations_handler(
    auth: AuthUser,
    query: HashMap<String, String>,
    state: AppState,
) -> Result<Response, Rejection> {
    let page = page_from_query(&query)?;
    let conversations = state.chat.list_conversations(auth.user.id, page).await?;
    Ok(paginated(conversations, page.limit, page.offset))
}

// GET /api/llm/conversations/{conversationId}
pub async fn get_conversation_handler(
    conversation_id: Uuid,
    auth: AuthUser,
    state: AppState,
) -> Result<Response, Rejection> {
    let detail = state
        .chat
        .get_conversation(conversation_id, auth.user.id)
        .await?;
    Ok(ok(detail))
}

// POST /api/llm/conversations/{conversationId}/messages
pub async fn send_message_handler(
    conversation_id: Uuid,
    auth: AuthUser,
    body: SendMessageRequest,
    state: AppState,
) -> Result<Response, Rejection> {
    body.validate()?;

    let content = body.content.unwrap_or_default();
    let options = ChatOptions {
        temperature: body.temperature,
        max_tokens: body.max_tokens,
        system_prompt: body.system_prompt,
    };

    if body.stream {
        let events = state
            .chat
            .stream_message(conversation_id, auth.user.id, &content, options)
            .await?;
        let stream = warp::sse::keep_alive().stream(chat_events(SyncStream::new(events)));
        return Ok(warp::sse::reply(stream).into_response());
    }

    let reply = state
        .chat
        .send_message(conversation_id, auth.user.id, &content, options)
        .await?;
    Ok(ok(reply))
}

// PUT /api/llm/conversations/{conversationId}
pub async fn update_conversation_handler(
    conversation_id: Uuid,
    auth: AuthUser,
    body: UpdateConversationRequest,
    state: AppState,
) -> Result<Response, Rejection> {
    let title = body.title.unwrap_or_default();
    let mut v = Validator::new();
    v.check(
        "title",
        title_ok(&title),
        "Title must be between 1 and 200 characters",
    );
    v.finish_joined()?;

    let conversation = state
        .chat
        .update_title(conversation_id, auth.user.id, &title)
        .await?;
    Ok(ok(conversation))
}

// DELETE /api/llm/conversations/{conversationId}
pub async fn delete_conversation_handler(
    conversation_id: Uuid,
    auth: AuthUser,
    state: AppState,
) -> Result<Response, Rejection> {
    state
        .chat
        .delete_conversation(conversation_id, auth.user.id)
        .await?;
    Ok(message("Conversation deleted successfully"))
}

// GET /api/llm/usage
pub async fn usage_handler(
    auth: AuthUser,
    query: HashMap<String, String>,
    state: AppState,
) -> Result<Response, Rejection> {
    let days = days_from_query(&query)?;
    let stats = state.chat.usage_stats(auth.user.id, days).await?;
    Ok(ok(stats))
}

// GET /api/llm/models
pub async fn models_handler(_auth: AuthUser) -> Result<Response, Rejection> {
    Ok(ok(&catalog::MODELS))
}
