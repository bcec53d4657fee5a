//! Process startup: storage selection, background tasks and the HTTP server

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{DbConfig, DbError, MemoryStore, PgStore, Store};
use crate::handlers::health::{check_database, HEALTHY};
use crate::llm::LlmError;
use crate::routes::configure_routes;
use crate::state::AppState;
use crate::ws::SystemStatus;

/// How often the debug room hears about database health
pub const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("database: {0}")]
    Database(#[from] DbError),

    #[error("llm provider: {0}")]
    Llm(#[from] LlmError),
}

/// `memory://` gives an in-process store, anything else connects and migrates Postgres
pub async fn build_store(config: &Config) -> Result<Arc<dyn Store>, DbError> {
    if config.uses_memory_store() {
        warn!("Using the in-memory store; data is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let db_config = DbConfig::from_connection_string(&config.database_url)?
        .with_max_pool_size(config.db_max_pool_size);
    let store = PgStore::connect(&db_config).await?;
    let applied = store.migrate().await?;
    if applied.is_empty() {
        info!("Database schema is up to date");
    } else {
        info!(migrations = ?applied, "Applied database migrations");
    }
    Ok(Arc::new(store))
}

/// Periodically push the database status to the debug room
pub fn spawn_status_monitor(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let database = check_database(&state).await;
            let status = if database.status == HEALTHY {
                "healthy"
            } else {
                "critical"
            };
            state
                .hub
                .broadcast_system_status(SystemStatus {
                    component: "database".to_string(),
                    status: status.to_string(),
                    message: database.error,
                    timestamp: Utc::now(),
                })
                .await;
        }
    })
}

/// Build everything from `config` and serve until SIGINT or SIGTERM
pub async fn run(config: Config) -> Result<(), ServerError> {
    let addr = config.listen_addr();
    let store = build_store(&config).await?;
    let provider = AppState::provider_from_config(&config)?;
    if provider.is_none() {
        warn!("ANTHROPIC_API_KEY is not set; LLM chat is disabled");
    }

    let state = AppState::new(config, store, provider);
    let monitor = spawn_status_monitor(state.clone(), STATUS_INTERVAL);
    let routes = configure_routes(state);

    info!(%addr, "Starting server");
    warp::serve(routes)
        .bind(addr)
        .await
        .graceful(shutdown_signal())
        .run()
        .await;

    monitor.abort();
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
