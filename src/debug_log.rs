//! Persisted request and event log for the admin debug view

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::db::Store;
use crate::error::ApiError;
use crate::models::{ComponentCount, DebugLog, DebugLogFilter, LogLevel, NewDebugLog};
use crate::ws::WsHub;

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Window for `get_stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        match self {
            TimeRange::Hour => Duration::hours(1),
            TimeRange::Day => Duration::hours(24),
            TimeRange::Week => Duration::days(7),
        }
    }
}

impl FromStr for TimeRange {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(TimeRange::Hour),
            "24h" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            _ => Err(ApiError::bad_request(
                "Invalid time range. Must be 1h, 24h, or 7d",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStats {
    pub time_range: TimeRange,
    pub total_logs: i64,
    pub error_count: i64,
    pub warn_count: i64,
    pub component_stats: Vec<ComponentCount>,
    /// Mean request duration in milliseconds, 0 when no row has one
    pub avg_response_time: f64,
}

/// One finished HTTP request
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: String,
    pub endpoint: String,
    pub status_code: u16,
    pub duration_ms: i64,
    pub user_id: Option<Uuid>,
    pub metadata: Option<Value>,
}

#[derive(Clone)]
pub struct DebugLogService {
    store: Arc<dyn Store>,
    hub: WsHub,
}

impl DebugLogService {
    pub fn new(store: Arc<dyn Store>, hub: WsHub) -> Self {
        Self { store, hub }
    }

    /// Persist a request row; failures are logged and swallowed
    pub async fn log_request(&self, record: RequestRecord) {
        let level = if record.status_code >= 400 {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        let mut log = NewDebugLog::new(
            level,
            format!(
                "{} {} - {}",
                record.method, record.endpoint, record.status_code
            ),
        )
        .with_component("API")
        .with_user(record.user_id);
        log.endpoint = Some(record.endpoint);
        log.method = Some(record.method);
        log.status_code = Some(i32::from(record.status_code));
        log.duration_ms = Some(record.duration_ms);
        log.metadata = record.metadata;

        self.insert(log).await;
    }

    /// Persist an application event; failures are logged and swallowed
    pub async fn log_event(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        component: Option<String>,
        user_id: Option<Uuid>,
        metadata: Option<Value>,
    ) -> Option<DebugLog> {
        let mut log = NewDebugLog::new(level, message).with_user(user_id);
        log.component = component;
        log.metadata = metadata;
        self.insert(log).await
    }

    async fn insert(&self, log: NewDebugLog) -> Option<DebugLog> {
        match self.store.insert_debug_log(log).await {
            Ok(row) => {
                self.hub.broadcast_log_entry(&row).await;
                Some(row)
            }
            Err(e) => {
                error!(error = %e, "Failed to write debug log");
                None
            }
        }
    }

    /// Rows newest first; the limit is clamped to `1..=MAX_LIMIT`
    pub async fn get_logs(&self, mut filter: DebugLogFilter) -> Result<Vec<DebugLog>, ApiError> {
        filter.limit = filter.limit.clamp(1, MAX_LIMIT);
        filter.offset = filter.offset.max(0);
        Ok(self.store.query_debug_logs(filter).await?)
    }

    pub async fn get_stats(&self, range: TimeRange) -> Result<DebugStats, ApiError> {
        let since = Utc::now() - range.duration();
        let counts = self.store.debug_log_counts(since).await?;
        Ok(DebugStats {
            time_range: range,
            total_logs: counts.total,
            error_count: counts.errors,
            warn_count: counts.warnings,
            component_stats: counts.components,
            avg_response_time: counts.avg_duration_ms.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use tokio::sync::mpsc;

    fn service() -> (DebugLogService, WsHub) {
        let hub = WsHub::new();
        (
            DebugLogService::new(Arc::new(MemoryStore::new()), hub.clone()),
            hub,
        )
    }

    fn request(status_code: u16, duration_ms: i64) -> RequestRecord {
        RequestRecord {
            method: "GET".to_string(),
            endpoint: "/api/health".to_string(),
            status_code,
            duration_ms,
            user_id: None,
            metadata: None,
        }
    }

    #[test]
    fn test_time_range_parse() {
        assert_eq!("1h".parse::<TimeRange>().unwrap(), TimeRange::Hour);
        assert_eq!("7d".parse::<TimeRange>().unwrap(), TimeRange::Week);
        assert!(matches!(
            "30d".parse::<TimeRange>(),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_log_request_level_and_message() {
        let (service, _) = service();
        service.log_request(request(200, 12)).await;
        service.log_request(request(404, 3)).await;

        let logs = service
            .get_logs(DebugLogFilter {
                limit: DEFAULT_LIMIT,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        let error = logs.iter().find(|l| l.level == LogLevel::Error).unwrap();
        assert_eq!(error.message, "GET /api/health - 404");
        assert_eq!(error.component.as_deref(), Some("API"));
        assert_eq!(error.status_code, Some(404));
    }

    #[tokio::test]
    async fn test_get_logs_filters_by_level() {
        let (service, _) = service();
        service.log_request(request(200, 1)).await;
        service
            .log_event(LogLevel::Warn, "disk almost full", Some("system".into()), None, None)
            .await;

        let warnings = service
            .get_logs(DebugLogFilter {
                limit: 10,
                level: Some(LogLevel::Warn),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "disk almost full");
    }

    #[tokio::test]
    async fn test_stats() {
        let (service, _) = service();
        service.log_request(request(200, 10)).await;
        service.log_request(request(500, 30)).await;
        service
            .log_event(LogLevel::Warn, "slow", Some("db".into()), None, None)
            .await;

        let stats = service.get_stats(TimeRange::Day).await.unwrap();
        assert_eq!(stats.total_logs, 3);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.warn_count, 1);
        assert_eq!(stats.avg_response_time, 20.0);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["timeRange"], "24h");
    }

    #[tokio::test]
    async fn test_new_rows_reach_debug_room() {
        let (service, hub) = service();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await;
        let now = Utc::now();
        hub.authenticate(
            id,
            &crate::models::User {
                id: Uuid::new_v4(),
                email: "admin@example.com".to_string(),
                password_hash: String::new(),
                first_name: None,
                last_name: None,
                role: crate::models::UserRole::Admin,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        )
        .await;
        hub.join_debug(id).await.unwrap();

        service
            .log_event(LogLevel::Info, "hello", None, None, None)
            .await;

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "new_log");
        assert_eq!(frame["data"]["message"], "hello");
    }
}
