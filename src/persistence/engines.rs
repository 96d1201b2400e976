//! Engine reference data persistence.

use std::collections::BTreeMap;

use crate::engine::{Engine, EngineType};
use crate::error::{DjqError, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

/// Raw database row for an engine.
#[derive(Debug, Clone, FromRow)]
struct EngineRow {
    name: String,
    version: String,
    #[sqlx(rename = "type")]
    engine_type: String,
    uri: String,
    extra_params: String,
}

impl TryFrom<EngineRow> for Engine {
    type Error = DjqError;

    fn try_from(row: EngineRow) -> Result<Self> {
        let extra_params: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&row.extra_params).map_err(|e| {
                DjqError::persistence(format!(
                    "Corrupt parameters for engine {} {}: {e}",
                    row.name, row.version
                ))
            })?;

        Ok(Self {
            name: row.name,
            version: row.version,
            engine_type: EngineType::parse(&row.engine_type),
            uri: row.uri,
            extra_params,
        })
    }
}

/// Inserts an engine, replacing any existing one with the same name and version.
pub async fn upsert_engine(pool: &SqlitePool, engine: &Engine) -> Result<()> {
    let extra_params = serde_json::to_string(&engine.extra_params)
        .map_err(|e| DjqError::internal(format!("Failed to serialize engine parameters: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO engines (name, version, type, uri, extra_params)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name, version) DO UPDATE SET
            type = excluded.type,
            uri = excluded.uri,
            extra_params = excluded.extra_params
        "#,
    )
    .bind(&engine.name)
    .bind(&engine.version)
    .bind(engine.engine_type.as_str())
    .bind(&engine.uri)
    .bind(extra_params)
    .execute(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to save engine: {e}")))?;

    Ok(())
}

/// Looks up an engine by name and version.
pub async fn get_engine(pool: &SqlitePool, name: &str, version: &str) -> Result<Option<Engine>> {
    let row: Option<EngineRow> = sqlx::query_as(
        "SELECT name, version, type, uri, extra_params FROM engines WHERE name = ? AND version = ?",
    )
    .bind(name)
    .bind(version)
    .fetch_optional(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to load engine: {e}")))?;

    row.map(Engine::try_from).transpose()
}

/// Lists all engines ordered by name and version.
pub async fn list_engines(pool: &SqlitePool) -> Result<Vec<Engine>> {
    let rows: Vec<EngineRow> = sqlx::query_as(
        "SELECT name, version, type, uri, extra_params FROM engines ORDER BY name, version",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| DjqError::persistence(format!("Failed to list engines: {e}")))?;

    rows.into_iter().map(Engine::try_from).collect()
}
