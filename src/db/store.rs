//! Storage interface used by the services
//!
//! Every persistence operation the API performs goes through [`Store`]. The
//! production implementation is [`PgStore`](super::PgStore); the in-process
//! [`MemoryStore`](super::MemoryStore) backs `memory://` deployments and the
//! test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::error::Result;
use crate::models::{
    ChatMessage, Conversation, ConversationSummary, DebugLog, DebugLogCounts, DebugLogFilter,
    HealthRecord, NewChatMessage, NewConversation, NewDebugLog, NewHealthRecord, NewSession,
    NewUser, Page, Preferences, ProfileUpdate, Session, UsageTotals, User,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trip to the backing database
    async fn ping(&self) -> Result<()>;

    // Users

    /// Insert a user. Fails with `UniqueViolation` when the email is taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Look a user up by (already lower-cased) email
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Apply the `Some` fields of `update` and bump `updated_at`
    async fn update_user_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User>;

    async fn update_user_password(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// Users ordered by creation time, newest first
    async fn list_users(&self, page: Page) -> Result<Vec<User>>;

    /// Stored preferences, or `None` when the user never saved any
    async fn find_preferences(&self, user_id: Uuid) -> Result<Option<Preferences>>;

    async fn upsert_preferences(&self, preferences: Preferences) -> Result<Preferences>;

    // Sessions

    async fn create_session(&self, session: NewSession) -> Result<Session>;

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;

    /// Swap the refresh-token hash of an active session, but only while it
    /// still holds `current_hash`; `false` when another rotation won
    async fn rotate_session_token(
        &self,
        session_id: Uuid,
        current_hash: &str,
        new_token_hash: &str,
    ) -> Result<bool>;

    async fn deactivate_session(&self, session_id: Uuid) -> Result<()>;

    /// Deactivate the user's active sessions, restricted to one token hash if given.
    /// Returns the number of sessions affected.
    async fn deactivate_user_sessions(
        &self,
        user_id: Uuid,
        token_hash: Option<&str>,
    ) -> Result<u64>;

    /// Deactivate one session if it belongs to the user. Returns rows affected.
    async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<u64>;

    /// All sessions of a user, newest first
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>>;

    // Conversations

    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation>;

    /// Conversation by id, only if owned by `user_id`
    async fn find_conversation(&self, id: Uuid, user_id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations by `updated_at` descending, with last message and count
    async fn list_conversations(&self, user_id: Uuid, page: Page)
        -> Result<Vec<ConversationSummary>>;

    async fn update_conversation_title(&self, id: Uuid, title: &str) -> Result<Conversation>;

    async fn delete_conversation(&self, id: Uuid) -> Result<()>;

    /// Add to the running token/cost totals and bump `updated_at`
    async fn add_conversation_usage(&self, id: Uuid, tokens: i64, cost: f64) -> Result<()>;

    async fn insert_message(&self, message: NewChatMessage) -> Result<ChatMessage>;

    /// Finalise a (placeholder) message
    async fn update_message(&self, id: Uuid, content: &str, tokens: i32, cost: f64) -> Result<()>;

    /// Messages of a conversation, oldest first
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>>;

    async fn usage_totals(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<UsageTotals>;

    // Debug logs

    async fn insert_debug_log(&self, log: NewDebugLog) -> Result<DebugLog>;

    /// Matching rows newest first, joined with their user
    async fn query_debug_logs(&self, filter: DebugLogFilter) -> Result<Vec<DebugLog>>;

    async fn debug_log_counts(&self, since: DateTime<Utc>) -> Result<DebugLogCounts>;

    // System health

    async fn insert_health_record(&self, record: NewHealthRecord) -> Result<HealthRecord>;

    async fn recent_health_records(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<HealthRecord>>;
}
