//! Embedded schema migrations
//!
//! Migrations are plain SQL files compiled into the binary and applied in
//! order inside a transaction each. Applied versions are recorded in
//! `schema_migrations` so re-running is a no-op.

use deadpool_postgres::Pool;
use tracing::info;

use crate::db::error::{DbError, Result};

/// A single embedded migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: &'static str,
    pub sql: &'static str,
}

/// All migrations, in application order
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: "0001_init",
    sql: include_str!("../../migrations/0001_init.sql"),
}];

/// Apply every migration that has not been recorded yet
///
/// Returns the versions applied by this call.
pub async fn run_migrations(pool: &Pool) -> Result<Vec<&'static str>> {
    let mut conn = pool.get().await?;

    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .await?;

    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        let exists = conn
            .query_opt(
                "SELECT 1 FROM schema_migrations WHERE version = $1",
                &[&migration.version],
            )
            .await?
            .is_some();
        if exists {
            continue;
        }

        let tx = conn.transaction().await?;
        tx.batch_execute(migration.sql)
            .await
            .map_err(|e| DbError::Migration {
                version: migration.version.to_string(),
                message: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES ($1)",
            &[&migration.version],
        )
        .await?;
        tx.commit().await?;

        info!(version = migration.version, "applied migration");
        applied.push(migration.version);
    }

    Ok(applied)
}
