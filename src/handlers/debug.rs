// /api/debug handlers

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use warp::reply::Response;
use warp::Rejection;

use crate::debug_log::{TimeRange, DEFAULT_LIMIT};
use crate::error::ApiError;
use crate::filters::AuthUser;
use crate::handlers::{message, ok, paginated};
use crate::models::{DebugLogFilter, LogLevel};
use crate::state::AppState;
use crate::validation::{sanitize_opt, Validator};

const LEVELS: [&str; 4] = ["DEBUG", "INFO", "WARN", "ERROR"];

#[derive(Debug, Deserialize)]
pub struct LogEventRequest {
    pub level: Option<String>,
    pub message: Option<String>,
    pub component: Option<String>,
    pub metadata: Option<Value>,
}

fn parse_date(field: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| ApiError::bad_request(format!("{} must be an ISO 8601 date", field)))
}

/// Build a log filter from query parameters
///
/// Unparseable numbers fall back to the defaults and unknown levels are
/// ignored; dates and user ids must be well formed.
pub fn log_filter(query: &HashMap<String, String>) -> Result<DebugLogFilter, ApiError> {
    let number = |key: &str, default: i64| {
        query
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    };

    let user_id = match query.get("userId") {
        Some(id) => Some(
            Uuid::parse_str(id).map_err(|_| ApiError::bad_request("userId must be a UUID"))?,
        ),
        None => None,
    };

    Ok(DebugLogFilter {
        limit: number("limit", DEFAULT_LIMIT),
        offset: number("offset", 0),
        level: query.get("level").and_then(|l| LogLevel::parse(l)),
        component: query.get("component").filter(|c| !c.is_empty()).cloned(),
        user_id,
        start: query
            .get("startDate")
            .map(|d| parse_date("startDate", d))
            .transpose()?,
        end: query
            .get("endDate")
            .map(|d| parse_date("endDate", d))
            .transpose()?,
    })
}

// GET /api/debug/logs
pub async fn logs_handler(
    _admin: AuthUser,
    query: HashMap<String, String>,
    state: AppState,
) -> Result<Response, Rejection> {
    let filter = log_filter(&query)?;
    let limit = filter.limit.clamp(1, crate::debug_log::MAX_LIMIT);
    let offset = filter.offset.max(0);
    let logs = state.debug_log.get_logs(filter).await?;
    Ok(paginated(logs, limit, offset))
}

// GET /api/debug/stats
pub async fn stats_handler(
    _admin: AuthUser,
    query: HashMap<String, String>,
    state: AppState,
) -> Result<Response, Rejection> {
    let range: TimeRange = query
        .get("timeRange")
        .map(String::as_str)
        .unwrap_or("24h")
        .parse()?;
    let stats = state.debug_log.get_stats(range).await?;
    Ok(ok(stats))
}

// POST /api/debug/log
pub async fn log_event_handler(
    auth: Option<AuthUser>,
    body: LogEventRequest,
    state: AppState,
) -> Result<Response, Rejection> {
    let message_text = sanitize_opt(body.message);
    let component = sanitize_opt(body.component).filter(|c| !c.is_empty());

    let mut v = Validator::new();
    let level = v.required("level", body.level.as_deref()).map(str::to_string);
    if let Some(level) = level.as_deref() {
        v.check(
            "level",
            LEVELS.contains(&level),
            "level must be DEBUG, INFO, WARN, or ERROR",
        );
    }
    v.required("message", message_text.as_deref());
    v.max_len("message", message_text.as_deref(), 1000)
        .max_len("component", component.as_deref(), 100);
    v.finish()?;

    let level = level
        .as_deref()
        .and_then(LogLevel::parse)
        .unwrap_or(LogLevel::Info);
    state
        .debug_log
        .log_event(
            level,
            message_text.unwrap_or_default(),
            component,
            auth.map(|a| a.user.id),
            body.metadata,
        )
        .await;

    Ok(message("Event logged successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_log_filter_defaults() {
        let filter = log_filter(&HashMap::new()).unwrap();
        assert_eq!(filter.limit, DEFAULT_LIMIT);
        assert_eq!(filter.offset, 0);
        assert!(filter.level.is_none());
    }

    #[test]
    fn test_log_filter_parses_values() {
        let filter = log_filter(&query(&[
            ("limit", "20"),
            ("offset", "abc"),
            ("level", "ERROR"),
            ("component", "API"),
            ("startDate", "2024-01-01T00:00:00Z"),
        ]))
        .unwrap();
        assert_eq!(filter.limit, 20);
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.level, Some(LogLevel::Error));
        assert_eq!(filter.component.as_deref(), Some("API"));
        assert!(filter.start.is_some());

        let filter = log_filter(&query(&[("level", "TRACE")])).unwrap();
        assert!(filter.level.is_none());
    }

    #[test]
    fn test_log_filter_rejects_bad_dates() {
        assert!(matches!(
            log_filter(&query(&[("endDate", "yesterday")])),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            log_filter(&query(&[("userId", "42")])),
            Err(ApiError::BadRequest(_))
        ));
    }
}
