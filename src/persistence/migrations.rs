//! Schema versioning and migrations for the state database.
//!
//! Manages database schema evolution with forward-only migrations.

use crate::error::{DjqError, Result};
use sqlx::sqlite::SqlitePool;
use tracing::info;

const CURRENT_VERSION: i32 = 1;

/// Runs all pending migrations on the database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    ensure_schema_versions_table(pool).await?;

    let current = get_current_version(pool).await?;

    if current > CURRENT_VERSION {
        return Err(DjqError::persistence(format!(
            "Database schema version ({}) is newer than supported version ({}). \
             Please upgrade dj-query to the latest version.",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        info!(
            "Migrating state database from version {} to {}",
            current, CURRENT_VERSION
        );
        run_pending_migrations(pool, current).await?;
    }

    Ok(())
}

/// Ensures the schema_versions table exists.
async fn ensure_schema_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to create schema_versions table: {e}")))?;

    Ok(())
}

/// Gets the current schema version.
async fn get_current_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_optional(pool)
        .await
        .map_err(|e| DjqError::persistence(format!("Failed to get schema version: {e}")))?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Runs migrations from the current version to the target version.
async fn run_pending_migrations(pool: &SqlitePool, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=CURRENT_VERSION {
        run_migration(pool, version).await?;
        record_version(pool, version).await?;
        info!("Applied migration v{}", version);
    }
    Ok(())
}

/// Records a completed migration version.
async fn record_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_versions (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| DjqError::persistence(format!("Failed to record migration: {e}")))?;
    Ok(())
}

/// Runs a specific migration version.
async fn run_migration(pool: &SqlitePool, version: i32) -> Result<()> {
    match version {
        1 => migration_v1(pool).await,
        _ => Err(DjqError::persistence(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: engines, queries and the results store.
async fn migration_v1(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS engines (
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            type TEXT NOT NULL,
            uri TEXT NOT NULL,
            extra_params TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (name, version)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to create engines table: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queries (
            id TEXT PRIMARY KEY,
            catalog_name TEXT NOT NULL,
            engine_name TEXT NOT NULL,
            engine_version TEXT NOT NULL,
            submitted_query TEXT NOT NULL,
            executed_query TEXT,
            scheduled TEXT,
            started TEXT,
            finished TEXT,
            state TEXT NOT NULL CHECK (state IN (
                'UNKNOWN', 'ACCEPTED', 'SCHEDULED', 'RUNNING', 'FINISHED', 'CANCELED', 'FAILED'
            )),
            progress REAL NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to create queries table: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to create results table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queries_state ON queries(state)")
        .execute(pool)
        .await
        .map_err(|e| DjqError::persistence(format!("Failed to create index: {e}")))?;

    Ok(())
}
