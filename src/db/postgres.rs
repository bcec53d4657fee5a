//! PostgreSQL implementation of [`Store`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::db::{
    connection::DbConfig,
    error::{DbError, Result},
    migrations,
    store::Store,
};
use crate::models::{
    ChatMessage, ChatRole, ComponentCount, Conversation, ConversationSummary, DebugLog,
    DebugLogCounts, DebugLogFilter, HealthRecord, LogLevel, LogUser, NewChatMessage,
    NewConversation, NewDebugLog, NewHealthRecord, NewSession, NewUser, Page, Preferences,
    ProfileUpdate, Session, UsageTotals, User, UserRole,
};

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, role, is_active, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, refresh_token_hash, user_agent, ip_address, \
     is_active, expires_at, created_at, updated_at";

const CONVERSATION_COLUMNS: &str =
    "id, user_id, title, model, total_tokens, total_cost, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, tokens, cost, created_at";

const HEALTH_COLUMNS: &str =
    "id, component, status, message, response_time_ms, metadata, created_at";

/// Store backed by a deadpool-managed PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Build the pool and check that a connection can be established
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = config.build_pool()?;

        // Test the connection
        let _conn = pool.get().await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<Vec<&'static str>> {
        migrations::run_migrations(&self.pool).await
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn user_from_row(row: &Row) -> Result<User> {
    let role: String = row.get("role");
    let role = UserRole::parse(&role)
        .ok_or_else(|| DbError::Validation(format!("Unknown user role: {}", role)))?;

    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        role,
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn preferences_from_row(row: &Row) -> Preferences {
    Preferences {
        user_id: row.get("user_id"),
        theme: row.get("theme"),
        language: row.get("language"),
        timezone: row.get("timezone"),
        debug_mode: row.get("debug_mode"),
        llm_model: row.get("llm_model"),
        llm_temperature: row.get("llm_temperature"),
        max_tokens: row.get("max_tokens"),
        updated_at: row.get("updated_at"),
    }
}

fn session_from_row(row: &Row) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        refresh_token_hash: row.get("refresh_token_hash"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
        is_active: row.get("is_active"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn conversation_from_row(row: &Row) -> Conversation {
    Conversation {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        model: row.get("model"),
        total_tokens: row.get("total_tokens"),
        total_cost: row.get("total_cost"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &Row) -> Result<ChatMessage> {
    let role: String = row.get("role");
    let role = ChatRole::parse(&role)
        .ok_or_else(|| DbError::Validation(format!("Unknown message role: {}", role)))?;

    Ok(ChatMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role,
        content: row.get("content"),
        tokens: row.get("tokens"),
        cost: row.get("cost"),
        created_at: row.get("created_at"),
    })
}

fn debug_log_from_row(row: &Row) -> Result<DebugLog> {
    let level: String = row.get("level");
    let level = LogLevel::parse(&level)
        .ok_or_else(|| DbError::Validation(format!("Unknown log level: {}", level)))?;

    let user_id: Option<Uuid> = row.get("user_id");
    let user_email: Option<String> = row.get("user_email");
    let user = match (user_id, user_email) {
        (Some(id), Some(email)) => Some(LogUser {
            id,
            email,
            first_name: row.get("user_first_name"),
            last_name: row.get("user_last_name"),
        }),
        _ => None,
    };

    Ok(DebugLog {
        id: row.get("id"),
        level,
        message: row.get("message"),
        component: row.get("component"),
        endpoint: row.get("endpoint"),
        method: row.get("method"),
        status_code: row.get("status_code"),
        duration_ms: row.get("duration_ms"),
        user_id,
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        user,
    })
}

fn health_from_row(row: &Row) -> HealthRecord {
    HealthRecord {
        id: row.get("id"),
        component: row.get("component"),
        status: row.get("status"),
        message: row.get("message"),
        response_time_ms: row.get("response_time_ms"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO users (id, email, password_hash, first_name, last_name, role)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            USER_COLUMNS
        );
        let row = conn
            .query_one(
                &sql,
                &[
                    &Uuid::new_v4(),
                    &user.email,
                    &user.password_hash,
                    &user.first_name,
                    &user.last_name,
                    &user.role.as_str(),
                ],
            )
            .await?;
        user_from_row(&row)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.pool.get().await?;
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        conn.query_opt(&sql, &[&email])
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.pool.get().await?;
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        conn.query_opt(&sql, &[&id])
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn update_user_profile(&self, id: Uuid, update: ProfileUpdate) -> Result<User> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                updated_at = now()
             WHERE id = $1
             RETURNING {}",
            USER_COLUMNS
        );
        let row = conn
            .query_opt(
                &sql,
                &[&id, &update.first_name, &update.last_name, &update.email],
            )
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))?;
        user_from_row(&row)
    }

    async fn update_user_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let conn = self.pool.get().await?;
        let updated = conn
            .execute(
                "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
                &[&id, &password_hash],
            )
            .await?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    async fn list_users(&self, page: Page) -> Result<Vec<User>> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            USER_COLUMNS
        );
        conn.query(&sql, &[&page.limit, &page.offset])
            .await?
            .iter()
            .map(user_from_row)
            .collect()
    }

    async fn find_preferences(&self, user_id: Uuid) -> Result<Option<Preferences>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT user_id, theme, language, timezone, debug_mode, llm_model,
                        llm_temperature, max_tokens, updated_at
                 FROM user_preferences WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(row.as_ref().map(preferences_from_row))
    }

    async fn upsert_preferences(&self, preferences: Preferences) -> Result<Preferences> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO user_preferences
                    (user_id, theme, language, timezone, debug_mode, llm_model, llm_temperature, max_tokens)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (user_id) DO UPDATE SET
                    theme = EXCLUDED.theme,
                    language = EXCLUDED.language,
                    timezone = EXCLUDED.timezone,
                    debug_mode = EXCLUDED.debug_mode,
                    llm_model = EXCLUDED.llm_model,
                    llm_temperature = EXCLUDED.llm_temperature,
                    max_tokens = EXCLUDED.max_tokens,
                    updated_at = now()
                 RETURNING user_id, theme, language, timezone, debug_mode, llm_model,
                           llm_temperature, max_tokens, updated_at",
                &[
                    &preferences.user_id,
                    &preferences.theme,
                    &preferences.language,
                    &preferences.timezone,
                    &preferences.debug_mode,
                    &preferences.llm_model,
                    &preferences.llm_temperature,
                    &preferences.max_tokens,
                ],
            )
            .await?;
        Ok(preferences_from_row(&row))
    }

    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO sessions (id, user_id, refresh_token_hash, user_agent, ip_address, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            SESSION_COLUMNS
        );
        let row = conn
            .query_one(
                &sql,
                &[
                    &Uuid::new_v4(),
                    &session.user_id,
                    &session.refresh_token_hash,
                    &session.user_agent,
                    &session.ip_address,
                    &session.expires_at,
                ],
            )
            .await?;
        Ok(session_from_row(&row))
    }

    async fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE refresh_token_hash = $1",
            SESSION_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&token_hash]).await?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn rotate_session_token(
        &self,
        session_id: Uuid,
        current_hash: &str,
        new_token_hash: &str,
    ) -> Result<bool> {
        let conn = self.pool.get().await?;
        let updated = conn
            .execute(
                "UPDATE sessions SET refresh_token_hash = $3, updated_at = now() \
                 WHERE id = $1 AND refresh_token_hash = $2 AND is_active",
                &[&session_id, &current_hash, &new_token_hash],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn deactivate_session(&self, session_id: Uuid) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE sessions SET is_active = FALSE, updated_at = now() WHERE id = $1",
            &[&session_id],
        )
        .await?;
        Ok(())
    }

    async fn deactivate_user_sessions(
        &self,
        user_id: Uuid,
        token_hash: Option<&str>,
    ) -> Result<u64> {
        let conn = self.pool.get().await?;
        let updated = conn
            .execute(
                "UPDATE sessions SET is_active = FALSE, updated_at = now()
                 WHERE user_id = $1 AND is_active
                   AND ($2::TEXT IS NULL OR refresh_token_hash = $2)",
                &[&user_id, &token_hash],
            )
            .await?;
        Ok(updated)
    }

    async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<u64> {
        let conn = self.pool.get().await?;
        let updated = conn
            .execute(
                "UPDATE sessions SET is_active = FALSE, updated_at = now()
                 WHERE id = $1 AND user_id = $2 AND is_active",
                &[&session_id, &user_id],
            )
            .await?;
        Ok(updated)
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        let rows = conn.query(&sql, &[&user_id]).await?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO llm_conversations (id, user_id, title, model)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            CONVERSATION_COLUMNS
        );
        let row = conn
            .query_one(
                &sql,
                &[
                    &Uuid::new_v4(),
                    &conversation.user_id,
                    &conversation.title,
                    &conversation.model,
                ],
            )
            .await?;
        Ok(conversation_from_row(&row))
    }

    async fn find_conversation(&self, id: Uuid, user_id: Uuid) -> Result<Option<Conversation>> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM llm_conversations WHERE id = $1 AND user_id = $2",
            CONVERSATION_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&id, &user_id]).await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> Result<Vec<ConversationSummary>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT c.id, c.user_id, c.title, c.model, c.total_tokens, c.total_cost,
                        c.created_at, c.updated_at,
                        (SELECT COUNT(*) FROM llm_messages m WHERE m.conversation_id = c.id)
                            AS message_count,
                        lm.id AS last_id, lm.role AS last_role, lm.content AS last_content,
                        lm.tokens AS last_tokens, lm.cost AS last_cost,
                        lm.created_at AS last_created_at
                 FROM llm_conversations c
                 LEFT JOIN LATERAL (
                     SELECT id, role, content, tokens, cost, created_at
                     FROM llm_messages
                     WHERE conversation_id = c.id
                     ORDER BY created_at DESC
                     LIMIT 1
                 ) lm ON TRUE
                 WHERE c.user_id = $1
                 ORDER BY c.updated_at DESC
                 LIMIT $2 OFFSET $3",
                &[&user_id, &page.limit, &page.offset],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let conversation = conversation_from_row(row);
                let last_id: Option<Uuid> = row.get("last_id");
                let last_message = match last_id {
                    Some(id) => {
                        let role: String = row.get("last_role");
                        Some(ChatMessage {
                            id,
                            conversation_id: conversation.id,
                            role: ChatRole::parse(&role).ok_or_else(|| {
                                DbError::Validation(format!("Unknown message role: {}", role))
                            })?,
                            content: row.get("last_content"),
                            tokens: row.get("last_tokens"),
                            cost: row.get("last_cost"),
                            created_at: row.get("last_created_at"),
                        })
                    }
                    None => None,
                };
                Ok(ConversationSummary {
                    conversation,
                    last_message,
                    message_count: row.get("message_count"),
                })
            })
            .collect()
    }

    async fn update_conversation_title(&self, id: Uuid, title: &str) -> Result<Conversation> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "UPDATE llm_conversations SET title = $2, updated_at = now()
             WHERE id = $1
             RETURNING {}",
            CONVERSATION_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&id, &title])
            .await?
            .ok_or_else(|| DbError::NotFound(format!("conversation {}", id)))?;
        Ok(conversation_from_row(&row))
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<()> {
        let conn = self.pool.get().await?;
        let deleted = conn
            .execute("DELETE FROM llm_conversations WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(DbError::NotFound(format!("conversation {}", id)));
        }
        Ok(())
    }

    async fn add_conversation_usage(&self, id: Uuid, tokens: i64, cost: f64) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE llm_conversations
             SET total_tokens = total_tokens + $2,
                 total_cost = total_cost + $3,
                 updated_at = now()
             WHERE id = $1",
            &[&id, &tokens, &cost],
        )
        .await?;
        Ok(())
    }

    async fn insert_message(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO llm_messages (id, conversation_id, role, content, tokens, cost)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            MESSAGE_COLUMNS
        );
        let row = conn
            .query_one(
                &sql,
                &[
                    &Uuid::new_v4(),
                    &message.conversation_id,
                    &message.role.as_str(),
                    &message.content,
                    &message.tokens,
                    &message.cost,
                ],
            )
            .await?;
        message_from_row(&row)
    }

    async fn update_message(&self, id: Uuid, content: &str, tokens: i32, cost: f64) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE llm_messages SET content = $2, tokens = $3, cost = $4 WHERE id = $1",
            &[&id, &content, &tokens, &cost],
        )
        .await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM llm_messages WHERE conversation_id = $1 ORDER BY created_at ASC, id",
            MESSAGE_COLUMNS
        );
        conn.query(&sql, &[&conversation_id])
            .await?
            .iter()
            .map(message_from_row)
            .collect()
    }

    async fn usage_totals(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<UsageTotals> {
        let conn = self.pool.get().await?;
        let conversations = conn
            .query_one(
                "SELECT COUNT(*) AS conversations,
                        COALESCE(SUM(total_tokens), 0)::BIGINT AS tokens,
                        COALESCE(SUM(total_cost), 0)::DOUBLE PRECISION AS cost
                 FROM llm_conversations
                 WHERE user_id = $1 AND created_at >= $2",
                &[&user_id, &since],
            )
            .await?;
        let messages = conn
            .query_one(
                "SELECT COUNT(*) AS messages
                 FROM llm_messages m
                 JOIN llm_conversations c ON c.id = m.conversation_id
                 WHERE c.user_id = $1 AND m.created_at >= $2",
                &[&user_id, &since],
            )
            .await?;

        Ok(UsageTotals {
            conversations: conversations.get("conversations"),
            messages: messages.get("messages"),
            tokens: conversations.get("tokens"),
            cost: conversations.get("cost"),
        })
    }

    async fn insert_debug_log(&self, log: NewDebugLog) -> Result<DebugLog> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "WITH inserted AS (
                     INSERT INTO debug_logs
                         (id, level, message, component, endpoint, method, status_code,
                          duration_ms, user_id, metadata)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                     RETURNING *
                 )
                 SELECT l.*, u.email AS user_email, u.first_name AS user_first_name,
                        u.last_name AS user_last_name
                 FROM inserted l
                 LEFT JOIN users u ON u.id = l.user_id",
                &[
                    &Uuid::new_v4(),
                    &log.level.as_str(),
                    &log.message,
                    &log.component,
                    &log.endpoint,
                    &log.method,
                    &log.status_code,
                    &log.duration_ms,
                    &log.user_id,
                    &log.metadata,
                ],
            )
            .await?;
        debug_log_from_row(&row)
    }

    async fn query_debug_logs(&self, filter: DebugLogFilter) -> Result<Vec<DebugLog>> {
        let conn = self.pool.get().await?;
        let level = filter.level.map(|level| level.as_str());
        let rows = conn
            .query(
                "SELECT l.*, u.email AS user_email, u.first_name AS user_first_name,
                        u.last_name AS user_last_name
                 FROM debug_logs l
                 LEFT JOIN users u ON u.id = l.user_id
                 WHERE ($1::TEXT IS NULL OR l.level = $1)
                   AND ($2::TEXT IS NULL OR l.component = $2)
                   AND ($3::UUID IS NULL OR l.user_id = $3)
                   AND ($4::TIMESTAMPTZ IS NULL OR l.created_at >= $4)
                   AND ($5::TIMESTAMPTZ IS NULL OR l.created_at <= $5)
                 ORDER BY l.created_at DESC
                 LIMIT $6 OFFSET $7",
                &[
                    &level,
                    &filter.component,
                    &filter.user_id,
                    &filter.start,
                    &filter.end,
                    &filter.limit,
                    &filter.offset,
                ],
            )
            .await?;
        rows.iter().map(debug_log_from_row).collect()
    }

    async fn debug_log_counts(&self, since: DateTime<Utc>) -> Result<DebugLogCounts> {
        let conn = self.pool.get().await?;
        let totals = conn
            .query_one(
                "SELECT COUNT(*) AS total,
                        COUNT(*) FILTER (WHERE level = 'ERROR') AS errors,
                        COUNT(*) FILTER (WHERE level = 'WARN') AS warnings,
                        AVG(duration_ms)::DOUBLE PRECISION AS avg_duration
                 FROM debug_logs
                 WHERE created_at >= $1",
                &[&since],
            )
            .await?;
        let components = conn
            .query(
                "SELECT component, COUNT(*) AS count
                 FROM debug_logs
                 WHERE created_at >= $1
                 GROUP BY component
                 ORDER BY count DESC",
                &[&since],
            )
            .await?
            .iter()
            .map(|row| ComponentCount {
                component: row.get("component"),
                count: row.get("count"),
            })
            .collect();

        Ok(DebugLogCounts {
            total: totals.get("total"),
            errors: totals.get("errors"),
            warnings: totals.get("warnings"),
            components,
            avg_duration_ms: totals.get("avg_duration"),
        })
    }

    async fn insert_health_record(&self, record: NewHealthRecord) -> Result<HealthRecord> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO system_health (id, component, status, message, response_time_ms, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            HEALTH_COLUMNS
        );
        let row = conn
            .query_one(
                &sql,
                &[
                    &Uuid::new_v4(),
                    &record.component,
                    &record.status,
                    &record.message,
                    &record.response_time_ms,
                    &record.metadata,
                ],
            )
            .await?;
        Ok(health_from_row(&row))
    }

    async fn recent_health_records(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<HealthRecord>> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM system_health WHERE created_at >= $1 ORDER BY created_at DESC LIMIT $2",
            HEALTH_COLUMNS
        );
        let rows = conn.query(&sql, &[&since, &limit]).await?;
        Ok(rows.iter().map(health_from_row).collect())
    }
}
