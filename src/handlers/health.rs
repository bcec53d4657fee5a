// /api/health handlers

use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

use crate::models::NewHealthRecord;
use crate::state::AppState;

pub const HEALTHY: &str = "healthy";
pub const WARNING: &str = "warning";
pub const UNHEALTHY: &str = "unhealthy";

/// Outcome of one component probe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: &'static str,
    pub response_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Round-trip the store and time it
pub async fn check_database(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    match state.store.ping().await {
        Ok(()) => ComponentHealth {
            status: HEALTHY,
            response_time: elapsed_ms(start),
            error: None,
        },
        Err(e) => {
            error!(error = %e, "Database health check failed");
            ComponentHealth {
                status: UNHEALTHY,
                response_time: elapsed_ms(start),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Worst of the given statuses
fn overall<'a>(statuses: impl IntoIterator<Item = &'a str>) -> &'static str {
    let mut result = HEALTHY;
    for status in statuses {
        if status == UNHEALTHY {
            return UNHEALTHY;
        }
        if status == WARNING {
            result = WARNING;
        }
    }
    result
}

// GET /
pub async fn root_handler() -> Result<Response, Rejection> {
    Ok(warp::reply::json(&json!({
        "message": "Web App Template API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response())
}

// GET /api/health
pub async fn health_handler(state: AppState) -> Result<Response, Rejection> {
    let start = Instant::now();
    let database = check_database(&state).await;
    let response_time = elapsed_ms(start);

    let status = if database.status == HEALTHY {
        HEALTHY
    } else {
        WARNING
    };

    let record = NewHealthRecord {
        component: "API".to_string(),
        status: status.to_string(),
        message: Some("Health check completed".to_string()),
        response_time_ms: response_time,
        metadata: Some(json!({
            "database": database,
            "uptime": state.uptime_secs(),
        })),
    };
    if let Err(e) = state.store.insert_health_record(record).await {
        warn!(error = %e, "Failed to log health check");
    }

    Ok(warp::reply::json(&json!({
        "status": status,
        "timestamp": Utc::now(),
        "uptime": state.uptime_secs(),
        "database": database,
        "responseTime": response_time,
        "environment": state.config.app_env.as_str(),
    }))
    .into_response())
}

// GET /api/health/database
pub async fn database_handler(state: AppState) -> Result<Response, Rejection> {
    let database = check_database(&state).await;
    let code = if database.status == HEALTHY {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": database.status,
        "timestamp": Utc::now(),
        "database": database,
    });
    Ok(warp::reply::with_status(warp::reply::json(&body), code).into_response())
}

// GET /api/health/detailed
pub async fn detailed_handler(state: AppState) -> Result<Response, Rejection> {
    let start = Instant::now();
    let database = check_database(&state).await;

    let since = Utc::now() - Duration::minutes(5);
    let recent = match state.store.recent_health_records(since, 10).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "Failed to load recent health records");
            Vec::new()
        }
    };
    let websocket = state.hub.stats().await;

    let api = ComponentHealth {
        status: HEALTHY,
        response_time: elapsed_ms(start),
        error: None,
    };
    let status = overall([database.status, api.status]);

    Ok(warp::reply::json(&json!({
        "status": status,
        "timestamp": Utc::now(),
        "checks": {
            "database": database,
            "api": api,
        },
        "recentHealth": recent,
        "websocket": {
            "totalConnections": websocket.total_connections,
            "authenticatedConnections": websocket.authenticated_connections,
        },
        "system": {
            "uptime": state.uptime_secs(),
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
    }))
    .into_response())
}
