//! In-process [`Store`] used for `memory://` deployments and tests
//!
//! Data lives behind a single async mutex and is lost on restart. The
//! behaviour mirrors [`PgStore`](super::PgStore), including unique
//! constraints and cascading deletes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::error::{DbError, Result};
use crate::db::store::Store;
use crate::models::{
    ChatMessage, ComponentCount, Conversation, ConversationSummary, DebugLog, DebugLogCounts,
    DebugLogFilter, HealthRecord, LogLevel, LogUser, NewChatMessage, NewConversation,
    NewDebugLog, NewHealthRecord, NewSession, NewUser, Page, Preferences, ProfileUpdate, Session,
    UsageTotals, User,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    preferences: HashMap<Uuid, Preferences>,
    sessions: Vec<Session>,
    conversations: Vec<Conversation>,
    messages: Vec<ChatMessage>,
    debug_logs: Vec<DebugLog>,
    health: Vec<HealthRecord>,
}

impl Tables {
    fn log_user(&self, user_id: Option<Uuid>) -> Option<LogUser> {
        let user_id = user_id?;
        self.users.iter().find(|u| u.id == user_id).map(|u| LogUser {
            id: u.id,
            email: u.email.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
        })
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect()
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(DbError::UniqueViolation("users_email_key".to_string()));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn update_user_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User> {
        let mut tables = self.tables.lock().await;
        if let Some(email) = &update.email {
            if tables.users.iter().any(|u| u.id != id && &u.email == email) {
                return Err(DbError::UniqueViolation("users_email_key".to_string()));
            }
        }
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))?;
        if let Some(first_name) = update.first_name {
            user.first_name = Some(first_name);
        }
        if let Some(last_name) = update.last_name {
            user.last_name = Some(last_name);
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn update_user_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn list_users(&self, page: Page) -> Result<Vec<User>> {
        let tables = self.tables.lock().await;
        let mut users = tables.users.clone();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(users, page))
    }

    async fn find_preferences(&self, user_id: Uuid) -> Result<Option<Preferences>> {
        let tables = self.tables.lock().await;
        Ok(tables.preferences.get(&user_id).cloned())
    }

    async fn upsert_preferences(&self, mut preferences: Preferences) -> Result<Preferences> {
        let mut tables = self.tables.lock().await;
        if !tables.users.iter().any(|u| u.id == preferences.user_id) {
            return Err(DbError::NotFound(format!("user {}", preferences.user_id)));
        }
        preferences.updated_at = Utc::now();
        tables
            .preferences
            .insert(preferences.user_id, preferences.clone());
        Ok(preferences)
    }

    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let mut tables = self.tables.lock().await;
        if tables
            .sessions
            .iter()
            .any(|s| s.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(DbError::UniqueViolation(
                "sessions_refresh_token_hash_key".to_string(),
            ));
        }
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            refresh_token_hash: session.refresh_token_hash,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
            is_active: true,
            expires_at: session.expires_at,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.refresh_token_hash == token_hash)
            .cloned())
    }

    async fn rotate_session_token(
        &self,
        session_id: Uuid,
        current_hash: &str,
        new_token_hash: &str,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let session = tables.sessions.iter_mut().find(|s| {
            s.id == session_id && s.is_active && s.refresh_token_hash == current_hash
        });
        match session {
            Some(session) => {
                session.refresh_token_hash = new_token_hash.to_string();
                session.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(session) = tables.sessions.iter_mut().find(|s| s.id == session_id) {
            session.is_active = false;
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn deactivate_user_sessions(
        &self,
        user_id: Uuid,
        token_hash: Option<&str>,
    ) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut count = 0;
        for session in tables.sessions.iter_mut().filter(|s| {
            s.user_id == user_id
                && s.is_active
                && token_hash.map_or(true, |hash| s.refresh_token_hash == hash)
        }) {
            session.is_active = false;
            session.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        match tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.user_id == user_id && s.is_active)
        {
            Some(session) => {
                session.is_active = false;
                session.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<Session> = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: conversation.user_id,
            title: conversation.title,
            model: conversation.model,
            total_tokens: 0,
            total_cost: 0.0,
            created_at: now,
            updated_at: now,
        };
        tables.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, id: Uuid, user_id: Uuid) -> Result<Option<Conversation>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .conversations
            .iter()
            .find(|c| c.id == id && c.user_id == user_id)
            .cloned())
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<ConversationSummary>> {
        let tables = self.tables.lock().await;
        let mut conversations: Vec<Conversation> = tables
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let summaries = paginate(conversations, page)
            .into_iter()
            .map(|conversation| {
                let messages: Vec<&ChatMessage> = tables
                    .messages
                    .iter()
                    .filter(|m| m.conversation_id == conversation.id)
                    .collect();
                ConversationSummary {
                    last_message: messages.last().map(|m| (*m).clone()),
                    message_count: messages.len() as i64,
                    conversation,
                }
            })
            .collect();
        Ok(summaries)
    }

    async fn update_conversation_title(&self, id: Uuid, title: &str) -> Result<Conversation> {
        let mut tables = self.tables.lock().await;
        let conversation = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DbError::NotFound(format!("conversation {}", id)))?;
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let before = tables.conversations.len();
        tables.conversations.retain(|c| c.id != id);
        if tables.conversations.len() == before {
            return Err(DbError::NotFound(format!("conversation {}", id)));
        }
        tables.messages.retain(|m| m.conversation_id != id);
        Ok(())
    }

    async fn add_conversation_usage(&self, id: Uuid, tokens: i64, cost: f64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(conversation) = tables.conversations.iter_mut().find(|c| c.id == id) {
            conversation.total_tokens += tokens;
            conversation.total_cost += cost;
            conversation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_message(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let mut tables = self.tables.lock().await;
        if !tables
            .conversations
            .iter()
            .any(|c| c.id == message.conversation_id)
        {
            return Err(DbError::NotFound(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        let message = ChatMessage {
            id: Uuid::new_v4(),
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            tokens: message.tokens,
            cost: message.cost,
            created_at: Utc::now(),
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn update_message(&self, id: Uuid, content: &str, tokens: i32, cost: f64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(message) = tables.messages.iter_mut().find(|m| m.id == id) {
            message.content = content.to_string();
            message.tokens = tokens;
            message.cost = cost;
        }
        Ok(())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>> {
        let tables = self.tables.lock().await;
        // Insertion order is creation order
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn usage_totals(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<UsageTotals> {
        let tables = self.tables.lock().await;
        let mut totals = UsageTotals::default();
        let owned: Vec<Uuid> = tables
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .collect();

        for conversation in tables
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id && c.created_at >= since)
        {
            totals.conversations += 1;
            totals.tokens += conversation.total_tokens;
            totals.cost += conversation.total_cost;
        }
        totals.messages = tables
            .messages
            .iter()
            .filter(|m| owned.contains(&m.conversation_id) && m.created_at >= since)
            .count() as i64;
        Ok(totals)
    }

    async fn insert_debug_log(&self, log: NewDebugLog) -> Result<DebugLog> {
        let mut tables = self.tables.lock().await;
        let user = tables.log_user(log.user_id);
        let row = DebugLog {
            id: Uuid::new_v4(),
            level: log.level,
            message: log.message,
            component: log.component,
            endpoint: log.endpoint,
            method: log.method,
            status_code: log.status_code,
            duration_ms: log.duration_ms,
            user_id: log.user_id,
            metadata: log.metadata,
            created_at: Utc::now(),
            user,
        };
        tables.debug_logs.push(row.clone());
        Ok(row)
    }

    async fn query_debug_logs(&self, filter: DebugLogFilter) -> Result<Vec<DebugLog>> {
        let tables = self.tables.lock().await;
        let matching: Vec<DebugLog> = tables
            .debug_logs
            .iter()
            .rev()
            .filter(|l| filter.level.map_or(true, |level| l.level == level))
            .filter(|l| {
                filter
                    .component
                    .as_ref()
                    .map_or(true, |c| l.component.as_ref() == Some(c))
            })
            .filter(|l| filter.user_id.map_or(true, |id| l.user_id == Some(id)))
            .filter(|l| filter.start.map_or(true, |start| l.created_at >= start))
            .filter(|l| filter.end.map_or(true, |end| l.created_at <= end))
            .map(|l| DebugLog {
                user: tables.log_user(l.user_id),
                ..l.clone()
            })
            .collect();
        Ok(paginate(matching, Page::new(filter.limit, filter.offset)))
    }

    async fn debug_log_counts(&self, since: DateTime<Utc>) -> Result<DebugLogCounts> {
        let tables = self.tables.lock().await;
        let recent: Vec<&DebugLog> = tables
            .debug_logs
            .iter()
            .filter(|l| l.created_at >= since)
            .collect();

        let mut by_component: Vec<ComponentCount> = Vec::new();
        for log in &recent {
            match by_component
                .iter_mut()
                .find(|c| c.component == log.component)
            {
                Some(entry) => entry.count += 1,
                None => by_component.push(ComponentCount {
                    component: log.component.clone(),
                    count: 1,
                }),
            }
        }
        by_component.sort_by(|a, b| b.count.cmp(&a.count));

        let durations: Vec<i64> = recent.iter().filter_map(|l| l.duration_ms).collect();
        let avg_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
        };

        Ok(DebugLogCounts {
            total: recent.len() as i64,
            errors: recent.iter().filter(|l| l.level == LogLevel::Error).count() as i64,
            warnings: recent.iter().filter(|l| l.level == LogLevel::Warn).count() as i64,
            components: by_component,
            avg_duration_ms,
        })
    }

    async fn insert_health_record(&self, record: NewHealthRecord) -> Result<HealthRecord> {
        let mut tables = self.tables.lock().await;
        let row = HealthRecord {
            id: Uuid::new_v4(),
            component: record.component,
            status: record.status,
            message: record.message,
            response_time_ms: record.response_time_ms,
            metadata: record.metadata,
            created_at: Utc::now(),
        };
        tables.health.push(row.clone());
        Ok(row)
    }

    async fn recent_health_records(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<HealthRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .health
            .iter()
            .rev()
            .filter(|r| r.created_at >= since)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
